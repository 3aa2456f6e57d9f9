//! Retry policy for establishing provider calls.
//!
//! Randomized exponential backoff: before attempt `n + 1` the client sleeps
//! a uniform random duration in `[min, min(max, min * 2^(n-1))]`. Only errors
//! classified by [`LlmError::is_retryable`] are retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use banter_types::llm::LlmError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
        }
    }

    /// Upper bound of the sleep after the given (1-based) failed attempt.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.min_backoff
            .saturating_mul(factor)
            .clamp(self.min_backoff, self.max_backoff)
    }

    /// Randomized sleep after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let low = self.min_backoff.as_secs_f64();
        let high = self.backoff_ceiling(attempt).as_secs_f64();
        if high <= low {
            return self.min_backoff;
        }
        Duration::from_secs_f64(rand::rng().random_range(low..=high))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying provider call after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
