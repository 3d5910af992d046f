//! Explicit retry wrapper for operator calls.
//!
//! The core never retries silently; callers opt in by wrapping a call with
//! [`call_with_retry`]. Retries use exponential backoff with optional
//! jitter and only re-attempt failures classified retryable
//! (timeouts and provider errors: see
//! [`CoreError::is_retryable`](crate::error::CoreError::is_retryable)).

use crate::error::Result;
use crate::operator::Operator;
use crate::record::Record;
use std::time::Duration;

/// Backoff configuration for retried calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: usize,
    /// Delay before the first retry, in seconds.
    pub initial_interval: f64,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Ceiling on the computed delay, in seconds.
    pub max_interval: f64,
    /// Add up to 25 % random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 30.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-indexed).
    fn delay(&self, attempt: usize) -> Duration {
        let base = self.initial_interval * self.backoff_factor.powi((attempt - 1) as i32);
        let capped = base.min(self.max_interval);
        let final_delay = if self.jitter {
            use rand::Rng;
            let jitter_factor = rand::thread_rng().gen_range(0.0..0.25);
            capped * (1.0 + jitter_factor)
        } else {
            capped
        };
        Duration::from_secs_f64(final_delay)
    }
}

/// Call an operator, re-attempting retryable failures per `policy`.
pub async fn call_with_retry(
    policy: &RetryPolicy,
    operator: &dyn Operator,
    inputs: Record,
) -> Result<Record> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match operator.call(inputs.clone()).await {
            Ok(outputs) => {
                if attempts > 1 {
                    tracing::info!(
                        operator = %operator.name(),
                        attempts,
                        "call succeeded after retry"
                    );
                }
                return Ok(outputs);
            }
            Err(error) => {
                if attempts >= policy.max_attempts || !error.is_retryable() {
                    if attempts > 1 {
                        tracing::error!(
                            operator = %operator.name(),
                            attempts,
                            error = %error,
                            "call failed after all retry attempts"
                        );
                    }
                    return Err(error);
                }
                let delay = policy.delay(attempts);
                tracing::warn!(
                    operator = %operator.name(),
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "call failed, retrying after delay"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
