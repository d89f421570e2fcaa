//! SSE framing.
//!
//! [`LineBuffer`] reassembles upstream lines across TCP chunk boundaries,
//! [`SseFrame::parse`] classifies a complete line, and [`SseFrame::encode`]
//! writes frames for the client.

use bytes::Bytes;

/// Payload of the terminal sentinel frame.
pub const DONE_PAYLOAD: &str = "[DONE]";

/// Maximum bytes held for a single incomplete line.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// One SSE frame, incoming or outgoing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// `data: <payload>`
    Data(String),
    /// `data: [DONE]`
    Done,
    /// Any other non-empty line (`event:`, `id:`, comments), kept verbatim.
    Raw(String),
}

impl SseFrame {
    /// Classify one complete line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        match line.strip_prefix("data:") {
            Some(data) => {
                let payload = data.strip_prefix(' ').unwrap_or(data);
                if payload.trim() == DONE_PAYLOAD {
                    Some(SseFrame::Done)
                } else {
                    Some(SseFrame::Data(payload.to_string()))
                }
            }
            None => Some(SseFrame::Raw(line.to_string())),
        }
    }

    /// Wire form. Data frames end the event with a blank line.
    pub fn encode(&self) -> String {
        match self {
            SseFrame::Data(payload) => format!("data: {}\n\n", payload),
            SseFrame::Done => format!("data: {}\n\n", DONE_PAYLOAD),
            SseFrame::Raw(line) => format!("{}\n", line),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode())
    }
}

/// Splits a byte stream into complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    /// Set after an overflow; input is dropped up to the next newline.
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, without terminators.
    ///
    /// A line longer than the cap is dropped whole, including the part that
    /// arrives after the overflow.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let bytes = if self.discarding {
            match bytes.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    &bytes[pos + 1..]
                }
                None => return Vec::new(),
            }
        } else {
            bytes
        };
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            lines.push(text.trim_end_matches(['\r', '\n']).to_string());
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "SSE line exceeded buffer cap, discarding"
            );
            self.buffer.clear();
            self.discarding = true;
        }

        lines
    }

    /// Whatever is left after the stream ended without a final newline.
    pub fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buffer);
        Some(text.trim_end_matches('\r').to_string())
    }
}
