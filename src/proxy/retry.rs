//! Bounded retry for fan-out calls.
//!
//! Each model walks `Attempting(1) -> ... -> Attempting(max)` and ends in
//! either success or a terminal failure. Only retryable errors advance to
//! the next attempt, and every advance is preceded by a fixed pause.

use std::time::Duration;

use super::executor::ExecutorError;

/// Pause between consecutive attempts.
pub const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ExecutorError {
    fn is_retryable(&self) -> bool {
        ExecutorError::is_retryable(self)
    }
}

/// Outcome of the full retry sequence.
pub struct RetryOutcome<T, E> {
    pub result: std::result::Result<T, E>,
    /// Attempts actually made, including the successful one.
    pub attempts: u32,
}

/// Run `send_request` up to `max_attempts` times.
///
/// Stops at the first success, the first non-retryable error, or when
/// attempts run out. `max_attempts` of zero is treated as one.
pub async fn retry_with_pause<T, E, F, Fut>(
    label: &str,
    max_attempts: u32,
    mut send_request: F,
) -> RetryOutcome<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match send_request(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(err) => {
                if !err.is_retryable() || attempt >= max_attempts {
                    tracing::error!(
                        model = %label,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Model failed"
                    );
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }

                tracing::warn!(
                    model = %label,
                    attempt,
                    max_attempts,
                    error = %err,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(RETRY_PAUSE).await;
                attempt += 1;
            }
        }
    }
}
