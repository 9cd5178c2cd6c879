//! Retry with exponential backoff.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::random;

/// Decides whether an error is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

/// Retry settings.
///
/// The delay before retry number `attempt` (counted from 1) is
/// `min(base_delay * 2^(attempt - 1), max_delay) * (1 ± jitter)`.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Fraction of the delay randomly added or removed.
    pub jitter: f64,
    retry_on: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// A policy with `max_retries` and the default timings
    /// (200 ms base, 5 s cap, 10 % jitter), retrying every error.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: 0.1,
            retry_on: None,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter fraction.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Restricts retries to errors matching `predicate`.
    #[must_use]
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Some(Arc::new(predicate));
        self
    }

    /// Whether `error` may be retried.
    #[must_use]
    pub fn should_retry(&self, error: &(dyn Error + 'static)) -> bool {
        self.retry_on.as_ref().map_or(true, |predicate| predicate(error))
    }

    /// Backoff before retry number `attempt` (counted from 1).
    #[must_use]
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base = self
            .base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
            .as_secs_f64();

        let delay = if self.jitter > 0.0 {
            base * self.jitter.mul_add(random::<f64>().mul_add(2.0, -1.0), 1.0)
        } else {
            base
        };
        Duration::from_secs_f64(delay.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("retry_on", &self.retry_on.is_some())
            .finish()
    }
}

/// Runs `operation` until it succeeds, the error is not retryable, or
/// `policy.max_retries` retries have been spent.
///
/// # Errors
///
/// Returns the last error produced by `operation`.
pub async fn retry_async<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                if attempt > policy.max_retries || !policy.should_retry(&error) {
                    return Err(error);
                }
                let delay = policy.compute_delay(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis(), error = %error, "Retrying after failure");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
