//! Bounded parallel task runner.

use std::error::Error;
use std::future::Future;

use futures::future::try_join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use super::rate_limit::SimpleRateLimiter;
use super::retry::{retry_async, RetryPolicy};

/// Options for [`parallel_run`].
#[derive(Debug, Clone)]
pub struct ParallelOptions {
    /// Maximum tasks in flight at once. Values below 1 are treated as 1.
    pub concurrency: usize,
    /// Return results in input order instead of completion order.
    pub preserve_order: bool,
    /// Retry policy applied to each task individually.
    pub retry_policy: RetryPolicy,
    /// Optional pacing shared by all tasks.
    pub rate_limit_per_minute: Option<u32>,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            preserve_order: true,
            retry_policy: RetryPolicy::none(),
            rate_limit_per_minute: None,
        }
    }
}

/// Runs every task factory with bounded concurrency.
///
/// Each attempt waits for the rate limiter first, and the whole task is
/// wrapped in the retry policy, so a factory may be called more than once.
/// With `preserve_order` the output matches the input order; otherwise
/// results are appended as tasks complete.
///
/// # Errors
///
/// Returns the first error of a task whose retries were exhausted.
pub async fn parallel_run<F, Fut, T, E>(
    factories: Vec<F>,
    options: &ParallelOptions,
) -> Result<Vec<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    let limiter = &SimpleRateLimiter::new(options.rate_limit_per_minute);
    let semaphore = &Semaphore::new(options.concurrency.max(1));
    let policy = &options.retry_policy;

    let tasks = factories.into_iter().map(move |mut factory| async move {
        let _permit = semaphore.acquire().await.ok();
        retry_async(policy, move || {
            let attempt = factory();
            async move {
                limiter.acquire().await;
                attempt.await
            }
        })
        .await
    });

    if options.preserve_order {
        return try_join_all(tasks).await;
    }

    let mut pending: FuturesUnordered<_> = tasks.collect();
    let mut results = Vec::with_capacity(pending.len());
    while let Some(result) = pending.next().await {
        results.push(result?);
    }
    Ok(results)
}

/// Applies `f` to every item through [`parallel_run`].
///
/// # Errors
///
/// Returns the first error of an item whose retries were exhausted.
pub async fn parallel_map<I, F, Fut, T, E>(
    items: Vec<I>,
    f: F,
    options: &ParallelOptions,
) -> Result<Vec<T>, E>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    let f = &f;
    let factories: Vec<_> = items
        .into_iter()
        .map(|item| move || f(item.clone()))
        .collect();
    parallel_run(factories, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn delayed(value: u64) -> Result<u64, InvokeError> {
        tokio::time::sleep(Duration::from_millis((6 - value) * 10)).await;
        Ok(value)
    }

    #[tokio::test(start_paused = true)]
    async fn preserve_order_returns_input_order() {
        let options = ParallelOptions::default();
        let results = parallel_map(vec![1, 2, 3, 4, 5], delayed, &options)
            .await
            .unwrap();
        assert_eq!(results, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn unordered_returns_completion_order() {
        let options = ParallelOptions {
            preserve_order: false,
            ..ParallelOptions::default()
        };
        let mut results = parallel_map(vec![1, 2, 3, 4, 5], delayed, &options)
            .await
            .unwrap();
        assert_eq!(results, vec![5, 4, 3, 2, 1]);

        results.sort_unstable();
        assert_eq!(results, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let in_flight = &AtomicUsize::new(0);
        let peak = &AtomicUsize::new(0);
        let options = ParallelOptions {
            concurrency: 2,
            ..ParallelOptions::default()
        };

        let results = parallel_map(
            (0..6).collect(),
            move |i: usize| async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, InvokeError>(i)
            },
            &options,
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn each_task_is_retried() {
        let calls = &AtomicUsize::new(0);
        let options = ParallelOptions {
            retry_policy: RetryPolicy::new(2),
            ..ParallelOptions::default()
        };

        let results = parallel_run(
            vec![move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(InvokeError::internal("flaky"))
                } else {
                    Ok("done")
                }
            }],
            &options,
        )
        .await
        .unwrap();

        assert_eq!(results, vec!["done"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn first_exhausted_error_is_returned() {
        let options = ParallelOptions::default();
        let result = parallel_map(
            vec![1, 2],
            |i: u32| async move {
                if i == 2 {
                    Err(InvokeError::internal("bad"))
                } else {
                    Ok(i)
                }
            },
            &options,
        )
        .await;

        assert_eq!(result, Err(InvokeError::internal("bad")));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_spaces_tasks() {
        let options = ParallelOptions {
            rate_limit_per_minute: Some(600),
            ..ParallelOptions::default()
        };
        let start = tokio::time::Instant::now();
        parallel_map(
            vec![1, 2, 3],
            |i: u32| async move { Ok::<_, InvokeError>(i) },
            &options,
        )
        .await
        .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
