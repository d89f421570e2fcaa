//! Backend request execution.
//!
//! Issues one authenticated chat-completion call to a model endpoint. Retry
//! policy lives in [`super::retry`], not here.

use axum::http::header;
use reqwest::Client;
use std::time::Duration;

use super::types::{Message, UpstreamRequest};
use crate::config::{ApiKey, ModelConfig, SummaryModelConfig};

/// Anything the executor can call: a fan-out model or a summarizer.
pub trait Backend {
    fn endpoint(&self) -> &str;
    fn bearer_token(&self) -> &ApiKey;
    fn model_name(&self) -> &str;
    fn temperature(&self) -> f32;
    fn timeout(&self) -> Duration;
}

impl Backend for ModelConfig {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }
    fn bearer_token(&self) -> &ApiKey {
        &self.bearer_token
    }
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn temperature(&self) -> f32 {
        self.temperature
    }
    fn timeout(&self) -> Duration {
        ModelConfig::timeout(self)
    }
}

impl Backend for SummaryModelConfig {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }
    fn bearer_token(&self) -> &ApiKey {
        &self.bearer_token
    }
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn temperature(&self) -> f32 {
        self.temperature
    }
    fn timeout(&self) -> Duration {
        SummaryModelConfig::timeout(self)
    }
}

/// A failed backend call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    #[error("request to '{model}' timed out")]
    Timeout { model: String },

    #[error("failed to reach '{model}': {message}")]
    Transport { model: String, message: String },

    #[error("'{model}' returned {status}: {body}")]
    Status {
        model: String,
        status: u16,
        body: String,
    },
}

impl ExecutorError {
    /// Transport errors and timeouts are transient; a status error is final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutorError::Timeout { .. } | ExecutorError::Transport { .. }
        )
    }

    /// Classify a reqwest error raised while talking to `model`.
    pub fn from_reqwest(model: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExecutorError::Timeout {
                model: model.to_string(),
            }
        } else {
            ExecutorError::Transport {
                model: model.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Send the request and check the status; the body is left unread.
async fn send<B: Backend + ?Sized>(
    client: &Client,
    backend: &B,
    messages: &[Message],
    stream: bool,
    debug: bool,
) -> Result<reqwest::Response, ExecutorError> {
    let body = UpstreamRequest {
        model: backend.model_name(),
        messages,
        stream,
        temperature: backend.temperature(),
    };

    if debug {
        tracing::info!(
            model = %backend.model_name(),
            endpoint = %backend.endpoint(),
            payload = %serde_json::to_string(&body).unwrap_or_default(),
            "Outbound request"
        );
    }

    let response = client
        .post(backend.endpoint())
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", backend.bearer_token().expose_secret()),
        )
        .timeout(backend.timeout())
        .json(&body)
        .send()
        .await
        .map_err(|e| ExecutorError::from_reqwest(backend.model_name(), e))?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response.text().await.unwrap_or_default();
        return Err(ExecutorError::Status {
            model: backend.model_name().to_string(),
            status: status.as_u16(),
            body: error_body,
        });
    }

    Ok(response)
}

/// Non-streaming call; returns the raw response body.
pub async fn complete<B: Backend + ?Sized>(
    client: &Client,
    backend: &B,
    messages: &[Message],
    debug: bool,
) -> Result<String, ExecutorError> {
    let response = send(client, backend, messages, false, debug).await?;
    let body = response
        .text()
        .await
        .map_err(|e| ExecutorError::from_reqwest(backend.model_name(), e))?;

    if debug {
        tracing::info!(model = %backend.model_name(), body = %body, "Backend response");
    }

    Ok(body)
}

/// Streaming call; returns the response once headers report success.
pub async fn open_stream<B: Backend + ?Sized>(
    client: &Client,
    backend: &B,
    messages: &[Message],
    debug: bool,
) -> Result<reqwest::Response, ExecutorError> {
    send(client, backend, messages, true, debug).await
}
