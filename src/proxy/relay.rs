//! Streaming relay.
//!
//! Produces the client-facing SSE sequence for `stream=true` requests:
//! an opening frame, optional per-model status frames as fan-out results
//! arrive, the summarizer's own stream re-framed line by line, then a
//! finish frame (or an inline error frame) and exactly one `data: [DONE]`.
//!
//! The relay runs in its own task and writes into a bounded channel that
//! backs the response body. When the client goes away the channel closes
//! and the relay stops emitting; fan-out tasks already running are left to
//! finish on their own.

use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::executor::{self, ExecutorError};
use super::fanout::{FanOut, ModelResult};
use super::sse::{LineBuffer, SseFrame};
use super::summary;
use super::types::{ChatCompletionChunk, ChunkChoice, Delta, Message};
use crate::config::SummaryModelConfig;

/// Frames buffered between the relay task and the response body.
const FRAME_BUFFER: usize = 32;

/// Body stream handed to axum.
pub type FrameStream = ReceiverStream<Result<Bytes, Infallible>>;

/// Builds `chat.completion.chunk` frames that share one id and timestamp.
#[derive(Debug, Clone)]
pub struct ChunkFactory {
    id: String,
    created: i64,
    model: String,
}

impl ChunkFactory {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
        }
    }

    fn frame(&self, delta: Delta, finish_reason: Option<&str>) -> SseFrame {
        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
        };
        let payload = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
        SseFrame::Data(payload)
    }

    /// Frame with a content delta.
    pub fn content(&self, text: impl Into<String>) -> SseFrame {
        self.frame(
            Delta {
                role: None,
                content: Some(text.into()),
            },
            None,
        )
    }

    /// Opening frame sent before anything else is known.
    pub fn opening(&self) -> SseFrame {
        self.content(" ")
    }

    /// One line per fan-out result: model name and a success or failure mark.
    pub fn status(&self, result: &ModelResult) -> SseFrame {
        let mark = if result.is_success() { "✅" } else { "❌" };
        self.content(format!("{} {}\n", result.model_name, mark))
    }

    pub fn error(&self, reason: &str) -> SseFrame {
        self.content(format!("Error: Summary generation failed - {}", reason))
    }

    /// Empty delta carrying `finish_reason: "stop"`.
    pub fn finish(&self) -> SseFrame {
        self.frame(Delta::default(), Some("stop"))
    }
}

/// Everything the relay task needs, owned.
pub struct RelayPlan {
    pub client: Client,
    /// Running fan-out in parallel mode, `None` in direct mode.
    pub fan_out: Option<FanOut>,
    pub messages: Arc<[Message]>,
    pub summary_model: SummaryModelConfig,
    pub status_feedback: bool,
    pub debug: bool,
    pub chunks: ChunkFactory,
    pub request_id: String,
}

/// The client hung up; nothing more can be delivered.
#[derive(Debug)]
struct ClientGone;

enum StreamFailure {
    Upstream(ExecutorError),
    ClientGone,
}

impl From<ClientGone> for StreamFailure {
    fn from(_: ClientGone) -> Self {
        StreamFailure::ClientGone
    }
}

struct FrameSink {
    sender: mpsc::Sender<Result<Bytes, Infallible>>,
}

impl FrameSink {
    async fn send(&self, frame: &SseFrame) -> Result<(), ClientGone> {
        self.sender
            .send(Ok(frame.to_bytes()))
            .await
            .map_err(|_| ClientGone)
    }
}

/// Start the relay task and return the stream that carries its frames.
pub fn spawn_relay(plan: RelayPlan) -> FrameStream {
    let (sender, receiver) = mpsc::channel(FRAME_BUFFER);
    let sink = FrameSink { sender };

    tokio::spawn(async move {
        let request_id = plan.request_id.clone();
        if relay(plan, &sink).await.is_err() {
            tracing::info!(request_id = %request_id, "Client disconnected, relay stopped");
        }
    });

    ReceiverStream::new(receiver)
}

async fn relay(mut plan: RelayPlan, sink: &FrameSink) -> Result<(), ClientGone> {
    sink.send(&plan.chunks.opening()).await?;

    let input = match plan.fan_out.take() {
        Some(mut fan_out) => {
            let mut results = Vec::with_capacity(fan_out.remaining());
            while let Some(result) = fan_out.next().await {
                if plan.status_feedback {
                    sink.send(&plan.chunks.status(&result)).await?;
                }
                results.push(result);
            }
            tracing::info!(
                request_id = %plan.request_id,
                succeeded = results.iter().filter(|r| r.is_success()).count(),
                total = results.len(),
                "Fan-out complete"
            );
            summary::build_parallel_input(&results, &plan.messages, &plan.summary_model)
        }
        None => summary::build_direct_input(&plan.messages, &plan.summary_model),
    };

    match stream_summary(&plan, &input, sink).await {
        Ok(()) => sink.send(&plan.chunks.finish()).await?,
        Err(StreamFailure::ClientGone) => return Err(ClientGone),
        Err(StreamFailure::Upstream(err)) => {
            tracing::error!(
                request_id = %plan.request_id,
                model = %plan.summary_model.model_name,
                error = %err,
                "Summary stream failed"
            );
            sink.send(&plan.chunks.error(&err.to_string())).await?;
        }
    }

    sink.send(&SseFrame::Done).await
}

/// Forward the summarizer's stream; its own `[DONE]` is swallowed.
async fn stream_summary(
    plan: &RelayPlan,
    input: &[Message],
    sink: &FrameSink,
) -> Result<(), StreamFailure> {
    let model = &plan.summary_model.model_name;
    let response = executor::open_stream(&plan.client, &plan.summary_model, input, plan.debug)
        .await
        .map_err(StreamFailure::Upstream)?;

    let mut body = response.bytes_stream();
    let mut lines = LineBuffer::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk
            .map_err(|e| StreamFailure::Upstream(ExecutorError::from_reqwest(model, e)))?;
        for line in lines.push(&chunk) {
            forward(plan, &line, sink).await?;
        }
    }
    if let Some(line) = lines.finish() {
        forward(plan, &line, sink).await?;
    }

    Ok(())
}

async fn forward(plan: &RelayPlan, line: &str, sink: &FrameSink) -> Result<(), ClientGone> {
    match SseFrame::parse(line) {
        None => Ok(()),
        Some(SseFrame::Done) => {
            tracing::debug!(request_id = %plan.request_id, "Swallowed upstream [DONE]");
            Ok(())
        }
        Some(frame) => {
            if plan.debug {
                tracing::info!(request_id = %plan.request_id, line = %line, "Summary stream line");
            }
            sink.send(&frame).await
        }
    }
}
