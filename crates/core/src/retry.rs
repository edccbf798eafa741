use crate::error::PipelineError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry schedule for external provider calls. Only errors whose
/// `PipelineError::is_retryable` returns true are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2,
        }
    }
}

/// Runs `operation` up to `policy.max_attempts` times, sleeping between
/// attempts with exponential backoff. Non-retryable errors and the final
/// attempt's error are returned as-is, kind preserved.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                warn!(
                    operation = label,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "transient provider error, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= policy.backoff_multiplier.max(1);
            }
            Err(error) => return Err(error),
        }
    }

    unreachable!("retry loop always returns from its final attempt")
}
