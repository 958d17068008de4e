use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff settings for calls that cross the network.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    /// Hard limit on each individual attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;

    /// The error reported when an attempt exceeds its timeout.
    fn timed_out(after: Duration) -> Self
    where
        Self: Sized;
}

/// Run `attempt` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up. Each attempt is bounded by `attempt_timeout`.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut attempt: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut number = 1;

    loop {
        debug!(operation = operation, attempt = number, "Sending request");

        let result = match tokio::time::timeout(policy.attempt_timeout, attempt(number)).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.attempt_timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && number < max_attempts => {
                let delay = policy.delay_after(number);
                warn!(
                    operation = operation,
                    attempt = number,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %crate::logging::sanitize_for_log(&e.to_string()),
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                number += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bound a single persistence call by `limit`.
pub async fn with_deadline<T, Fut>(limit: Duration, operation: &str, fut: Fut) -> anyhow::Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("{} timed out after {:?}", operation, limit)),
    }
}
