//! HTTP gateway and aggregation engine.
//!
//! This module provides the OpenAI-compatible HTTP API, the parallel
//! fan-out to backend models, and the summarizer relay.

pub mod executor;
pub mod fanout;
mod handlers;
pub mod relay;
pub mod retry;
mod server;
pub mod sse;
pub mod summary;
pub mod types;

pub use handlers::{COMBINATION_HEADER, REQUEST_ID_HEADER};
pub use server::{create_router, run_server, AppState};
pub use types::{ChatCompletionRequest, Message, MessageContent};
