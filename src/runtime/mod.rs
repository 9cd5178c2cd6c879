//! Concurrency primitives: retry with backoff, fixed-interval rate limiting
//! and bounded parallel fan-out.

mod parallel;
mod rate_limit;
mod retry;

pub use parallel::{parallel_map, parallel_run, ParallelOptions};
pub use rate_limit::SimpleRateLimiter;
pub use retry::{retry_async, RetryPolicy, RetryPredicate};
