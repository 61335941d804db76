use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{ApiError, ApiResult};

/// Retry budget and backoff shape for one API client.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Used for 429 responses that carry no `Retry-After`.
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            default_retry_after: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    /// `min(base * 2^(attempt-1), max)` for the 1-based retry number.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay before retry number `attempt`, or `None` when the error must be
    /// propagated.
    pub fn delay_for(&self, err: &ApiError, attempt: u32) -> Option<Duration> {
        if !err.is_retryable() || attempt > self.max_retries {
            return None;
        }
        if err.is_rate_limited() {
            return Some(err.retry_after().unwrap_or(self.default_retry_after));
        }
        Some(self.backoff(attempt))
    }
}

/// Run `op` until it succeeds, fails terminally, or the budget is spent.
/// The last error is returned once retries are exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                let Some(delay) = policy.delay_for(&err, attempt) else {
                    return Err(err);
                };
                warn!(
                    "{label} failed ({err}), retry {attempt}/{} in {:?}",
                    policy.max_retries, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
