//! Summary input construction.
//!
//! Turns the collected fan-out results (parallel mode) or the raw
//! conversation (direct mode) into the message list for the summarizer.

use super::fanout::{ModelOutcome, ModelResult};
use super::types::{ChatCompletionResponse, Message};
use crate::config::SummaryModelConfig;

/// Label put in front of every reference answer.
pub const REFERENCE_LABEL: &str = "参考回答";

/// Pull the assistant text out of a raw completion body.
///
/// Returns `None` for undecodable JSON, missing choices, or null content.
pub fn extract_answer(body: &str) -> Option<String> {
    let response: ChatCompletionResponse = serde_json::from_str(body).ok()?;
    response.choices.into_iter().next()?.message.content
}

/// Join usable answers into one reference block, numbered 1.. without gaps.
///
/// Failed and undecodable results are skipped; numbering follows the order
/// of `results` among the answers that remain.
pub fn reference_block(results: &[ModelResult]) -> Option<String> {
    let answers: Vec<String> = results
        .iter()
        .filter_map(|result| match &result.outcome {
            ModelOutcome::Success(body) => {
                let answer = extract_answer(body);
                if answer.is_none() {
                    tracing::warn!(
                        model = %result.model_name,
                        "Dropping undecodable model response"
                    );
                }
                answer
            }
            ModelOutcome::Failure(reason) => {
                tracing::debug!(model = %result.model_name, reason = %reason, "Skipping failed model");
                None
            }
        })
        .enumerate()
        .map(|(i, answer)| format!("{}{}: {}", REFERENCE_LABEL, i + 1, answer))
        .collect();

    if answers.is_empty() {
        None
    } else {
        Some(answers.join("\n\n"))
    }
}

/// Summarizer input for parallel mode.
///
/// Order: prior history (if `keep_history`), the reference block as one
/// assistant message (omitted when nothing usable came back), the summary
/// prompt as a user message, then the original last message unchanged.
pub fn build_parallel_input(
    results: &[ModelResult],
    messages: &[Message],
    summary_model: &SummaryModelConfig,
) -> Vec<Message> {
    let (last, history) = match messages.split_last() {
        Some((last, history)) => (Some(last), history),
        None => (None, &[][..]),
    };

    let mut input = Vec::with_capacity(history.len() + 3);
    if summary_model.keep_history {
        input.extend_from_slice(history);
    }
    if let Some(references) = reference_block(results) {
        input.push(Message::assistant(references));
    }
    input.push(Message::user(summary_model.summary_prompt.clone()));
    input.extend(last.cloned());
    input
}

/// Summarizer input for direct mode: the whole history or just the last turn.
///
/// An empty conversation falls back to the summary prompt so the
/// summarizer never receives an empty list.
pub fn build_direct_input(messages: &[Message], summary_model: &SummaryModelConfig) -> Vec<Message> {
    match messages.split_last() {
        Some(_) if summary_model.keep_history => messages.to_vec(),
        Some((last, _)) => vec![last.clone()],
        None => vec![Message::user(summary_model.summary_prompt.clone())],
    }
}
