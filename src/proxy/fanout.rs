//! Fan-out coordinator.
//!
//! Runs one independent task per configured model and reports each result
//! through an mpsc queue. The consumer can react to results as they arrive
//! ([`FanOut::next`]) and the queue acts as a barrier: exactly one
//! [`ModelResult`] per model is delivered before [`FanOut::next`] returns
//! `None`.

use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::executor::{self, ExecutorError};
use super::retry::retry_with_pause;
use super::types::Message;
use crate::config::ModelConfig;

/// Terminal state of one model's retry sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutcome {
    /// Raw response body
    Success(String),
    /// Why the model was given up on
    Failure(String),
}

/// One model's contribution to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResult {
    pub model_name: String,
    pub outcome: ModelOutcome,
}

impl ModelResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ModelOutcome::Success(_))
    }
}

/// Receiving side of a running fan-out.
pub struct FanOut {
    receiver: mpsc::UnboundedReceiver<(usize, ModelResult)>,
    model_names: Vec<String>,
    reported: Vec<bool>,
    remaining: usize,
}

impl FanOut {
    /// Spawn one task per model; each task runs the bounded retry loop
    /// around `call` and reports exactly once.
    pub fn spawn_with<F, Fut>(models: &[ModelConfig], call: F) -> Self
    where
        F: Fn(ModelConfig) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ExecutorError>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();

        for (index, model) in models.iter().cloned().enumerate() {
            let sender = sender.clone();
            let call = call.clone();
            tokio::spawn(async move {
                let model_name = model.model_name.clone();
                let outcome = retry_with_pause(&model_name, model.max_attempts(), |attempt| {
                    tracing::debug!(model = %model.model_name, attempt, "Calling model");
                    call(model.clone())
                })
                .await;

                let outcome = match outcome.result {
                    Ok(body) => {
                        tracing::info!(
                            model = %model_name,
                            attempts = outcome.attempts,
                            "Model succeeded"
                        );
                        ModelOutcome::Success(body)
                    }
                    Err(err) => ModelOutcome::Failure(err.to_string()),
                };

                // The receiver may be gone if the client disconnected.
                let _ = sender.send((
                    index,
                    ModelResult {
                        model_name,
                        outcome,
                    },
                ));
            });
        }

        Self {
            receiver,
            model_names: models.iter().map(|m| m.model_name.clone()).collect(),
            reported: vec![false; models.len()],
            remaining: models.len(),
        }
    }

    /// Number of results still to be delivered.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Next result in completion order, or `None` once every model reported.
    ///
    /// A task that ends without reporting (e.g. a panic) is surfaced as a
    /// failure so the barrier still yields one result per model.
    pub async fn next(&mut self) -> Option<ModelResult> {
        if self.remaining == 0 {
            return None;
        }

        let (index, result) = match self.receiver.recv().await {
            Some(received) => received,
            None => {
                let index = self.reported.iter().position(|r| !r)?;
                let result = ModelResult {
                    model_name: self.model_names[index].clone(),
                    outcome: ModelOutcome::Failure("task ended without reporting".to_string()),
                };
                (index, result)
            }
        };

        self.reported[index] = true;
        self.remaining -= 1;
        Some(result)
    }

    /// Wait for every model and return the results in completion order.
    pub async fn collect(mut self) -> Vec<ModelResult> {
        let mut results = Vec::with_capacity(self.remaining);
        while let Some(result) = self.next().await {
            results.push(result);
        }
        results
    }
}

/// Start the fan-out against real endpoints.
pub fn spawn_fan_out(
    client: &Client,
    models: &[ModelConfig],
    messages: Arc<[Message]>,
    debug: bool,
) -> FanOut {
    let client = client.clone();
    FanOut::spawn_with(models, move |model| {
        let client = client.clone();
        let messages = messages.clone();
        async move { executor::complete(&client, &model, &messages, debug).await }
    })
}
