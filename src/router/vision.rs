//! Vision request detection and image reference validation.

use regex::Regex;
use std::sync::OnceLock;

use crate::proxy::types::{ContentBlock, Message, MessageContent};

/// Image formats accepted in inline `data:` URLs.
pub const SUPPORTED_IMAGE_FORMATS: [&str; 4] = ["jpeg", "png", "gif", "webp"];

/// Detail level assigned to image blocks that do not specify one.
const DEFAULT_DETAIL: &str = "auto";

fn data_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^data:image/([A-Za-z0-9.+-]+);base64,([A-Za-z0-9+/]+={0,2})$")
            .expect("static regex is valid")
    })
}

/// Whether `url` is an acceptable image reference.
///
/// Accepts http(s) links and well-formed base64 `data:image/<fmt>` URLs whose
/// format is in [`SUPPORTED_IMAGE_FORMATS`].
pub fn validate_image_url(url: &str) -> bool {
    if url.starts_with("data:image/") {
        let Some(captures) = data_url_pattern().captures(url) else {
            tracing::debug!("Rejected malformed inline image");
            return false;
        };
        let format = captures[1].to_ascii_lowercase();
        let supported = SUPPORTED_IMAGE_FORMATS.contains(&format.as_str());
        if !supported {
            tracing::debug!(format = %format, "Rejected unsupported inline image format");
        }
        return supported;
    }

    url.starts_with("http://") || url.starts_with("https://")
}

/// A request is a vision request iff some message carries a valid image block.
pub fn is_vision_request(messages: &[Message]) -> bool {
    messages.iter().any(|message| match &message.content {
        MessageContent::Blocks(blocks) => blocks.iter().any(|block| match block {
            ContentBlock::ImageUrl { image_url } => validate_image_url(&image_url.url),
            ContentBlock::Text { .. } | ContentBlock::Unsupported => false,
        }),
        MessageContent::Text(_) => false,
    })
}

/// Prepare client messages for forwarding.
///
/// Unsupported blocks are always dropped. For vision requests, invalid image
/// blocks are dropped as well and the remaining ones get a default `detail`.
/// String contents and text blocks pass through untouched.
pub fn sanitize_messages(messages: Vec<Message>, vision: bool) -> Vec<Message> {
    messages
        .into_iter()
        .map(|mut message| {
            if let MessageContent::Blocks(blocks) = message.content {
                let kept = blocks
                    .into_iter()
                    .filter_map(|block| match block {
                        ContentBlock::Unsupported => None,
                        ContentBlock::ImageUrl { mut image_url } if vision => {
                            if !validate_image_url(&image_url.url) {
                                return None;
                            }
                            image_url
                                .detail
                                .get_or_insert_with(|| DEFAULT_DETAIL.to_string());
                            Some(ContentBlock::ImageUrl { image_url })
                        }
                        other => Some(other),
                    })
                    .collect();
                message.content = MessageContent::Blocks(kept);
            }
            message
        })
        .collect()
}
