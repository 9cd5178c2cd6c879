//! Fixed-interval rate limiter.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Paces acquisitions to at most `rate_per_minute`, spaced evenly.
///
/// A single "last dispatch" instant is shared by every caller; each
/// acquisition sleeps only the remaining part of the interval.
#[derive(Debug)]
pub struct SimpleRateLimiter {
    interval: Option<Duration>,
    last: Mutex<Option<Instant>>,
}

impl SimpleRateLimiter {
    /// Creates a limiter. `None` or zero disables pacing.
    #[must_use]
    pub fn new(rate_per_minute: Option<u32>) -> Self {
        let interval = rate_per_minute
            .filter(|rate| *rate > 0)
            .map(|rate| Duration::from_secs(60) / rate);
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Whether pacing is active.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Waits until the next slot is available.
    pub async fn acquire(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn disabled_limiter_never_waits() {
        let limiter = SimpleRateLimiter::new(None);
        assert!(!limiter.enabled());

        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn paces_acquisitions() {
        let limiter = SimpleRateLimiter::new(Some(120));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_counts_toward_interval() {
        let limiter = SimpleRateLimiter::new(Some(60));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_millis(700)).await;

        let before = Instant::now();
        limiter.acquire().await;
        let waited = before.elapsed();
        assert!(waited >= Duration::from_millis(300));
        assert!(waited < Duration::from_millis(400));
    }
}
