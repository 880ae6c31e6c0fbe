//! Retry engine
//!
//! Generalizes `honeylink_transport::retry::{RetryPolicy, RetryExecutor}`
//! for the export pipeline: operations are classified as transient or
//! fatal through the [`Classify`] trait rather than a closed match on a
//! single error type, backoff doubles deterministically each attempt
//! (`delay_{i+1} = min(2 * delay_i, 8000ms)`) with uniform jitter in
//! `[-0.2*delay, +0.2*delay]` drawn from [`rand::rngs::OsRng`], and each
//! attempt is wrapped in a [`tokio::time::timeout`].

pub mod error;

pub use error::{Error, Result};

use rand::rngs::OsRng;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Whether a failed operation should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Transient,
    Fatal,
}

/// Implemented by error types the retry engine needs to classify.
/// Encoders and transports that can fail in both retryable and
/// non-retryable ways (e.g. HTTP 429/5xx vs. 400/401) implement this
/// directly on their error enum.
pub trait Classify {
    fn classify(&self) -> Classification;
}

/// Backoff and retry-count limits.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Timeout applied to each individual attempt, independent of the
    /// overall retry budget.
    pub per_attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Conservative default matching the export pipeline's at-least-once,
    /// best-effort delivery goal: a handful of attempts within a few
    /// seconds, never blocking the flusher indefinitely.
    pub fn default_export() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            per_attempt_timeout: Duration::from_secs(10),
        }
    }

    /// The absolute ceiling on the undithered delay, independent of
    /// `max_backoff` — the lower of the two applies.
    const ABSOLUTE_MAX_BACKOFF: Duration = Duration::from_millis(8000);

    /// `delay_{i+1} = min(2 * delay_i, 8000ms)`, further capped by
    /// `self.max_backoff`. Operates on the undithered delay so doubling
    /// stays deterministic; jitter is applied only to the sleep itself
    /// by [`RetryPolicy::jittered_sleep`].
    fn next_delay(&self, prev: Duration) -> Duration {
        let cap = Self::ABSOLUTE_MAX_BACKOFF.min(self.max_backoff);
        prev.saturating_mul(2).min(cap)
    }

    /// Adds uniform jitter in `[-0.2*delay, +0.2*delay]` using a
    /// cryptographic RNG, floored at zero.
    fn jittered_sleep(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis() as i64;
        let spread = (ms as f64 * 0.2).round() as i64;
        let jitter = if spread > 0 { OsRng.gen_range(-spread..=spread) } else { 0 };
        Duration::from_millis((ms + jitter).max(0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_export()
    }
}

/// Executes operations under a [`RetryPolicy`], tracking attempt counts
/// for self-metrics.
pub struct RetryExecutor {
    policy: RetryPolicy,
    retry_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retry_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    /// Runs `operation` until it succeeds, a fatal error is returned, or
    /// the retry budget is exhausted. Each attempt is bounded by
    /// `policy.per_attempt_timeout`; a timeout counts as a transient
    /// failure against the same retry budget as a classified error.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Classify + std::error::Error + Send + Sync + 'static,
    {
        let mut attempt: u32 = 0;
        let mut delay = self.policy.base_backoff;

        loop {
            match tokio::time::timeout(self.policy.per_attempt_timeout, operation()).await {
                Ok(Ok(value)) => {
                    self.success_count.fetch_add(1, Ordering::Relaxed);
                    if attempt > 0 {
                        self.retry_count.fetch_add(attempt as u64, Ordering::Relaxed);
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    if e.classify() == Classification::Fatal || attempt >= self.policy.max_retries
                    {
                        self.failure_count.fetch_add(1, Ordering::Relaxed);
                        return Err(Error::RetriesExhausted {
                            attempts: attempt + 1,
                            source: Box::new(e),
                        });
                    }
                }
                Err(_elapsed) => {
                    tracing::warn!(attempt, "operation timed out, treating as transient");
                    if attempt >= self.policy.max_retries {
                        self.failure_count.fetch_add(1, Ordering::Relaxed);
                        return Err(Error::Timeout(self.policy.per_attempt_timeout));
                    }
                }
            }

            tokio::time::sleep(self.policy.jittered_sleep(delay)).await;
            delay = self.policy.next_delay(delay);
            attempt += 1;
        }
    }

    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default_export())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
    }

    impl Classify for TestError {
        fn classify(&self) -> Classification {
            match self {
                TestError::Transient => Classification::Transient,
                TestError::Fatal => Classification::Fatal,
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            per_attempt_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn succeeds_immediately_without_retrying() {
        let executor = RetryExecutor::new(fast_policy());
        let result: Result<u32> =
            executor.execute(|| async { Ok::<u32, TestError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(executor.retry_count(), 0);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let executor = RetryExecutor::new(fast_policy());
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = executor
            .execute(|| {
                let n = attempts.fetch_add(1, Ordering::Relaxed);
                async move {
                    if n < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert!(executor.retry_count() >= 2);
    }

    #[tokio::test]
    async fn fatal_error_short_circuits() {
        let executor = RetryExecutor::new(fast_policy());
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = executor
            .execute(|| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { Err(TestError::Fatal) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert_eq!(executor.failure_count(), 1);
    }

    /// Boundary from spec: baseDelay=250, two sleeps (delay0=250,
    /// delay1=500) each jittered by up to +/-20%, so the undithered total
    /// falls in [(250+500)*0.8, (250+500)*1.2] ms.
    #[test]
    fn backoff_doubles_deterministically_and_caps_at_eight_seconds() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            per_attempt_timeout: Duration::from_secs(10),
        };
        let delay0 = policy.base_backoff;
        let delay1 = policy.next_delay(delay0);
        assert_eq!(delay1, Duration::from_millis(500));
        let delay2 = policy.next_delay(delay1);
        assert_eq!(delay2, Duration::from_millis(1000));

        let total_ms = (delay0 + delay1).as_millis() as f64;
        assert!((600.0..=900.0).contains(&total_ms));

        // Doubling saturates at 8000ms regardless of how large base_backoff is.
        let mut delay = Duration::from_millis(5000);
        for _ in 0..5 {
            delay = policy.next_delay(delay);
        }
        assert_eq!(delay, Duration::from_millis(8000));
    }

    #[test]
    fn jittered_sleep_stays_within_twenty_percent() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            per_attempt_timeout: Duration::from_secs(10),
        };
        for _ in 0..100 {
            let jittered = policy.jittered_sleep(Duration::from_millis(1000));
            let ms = jittered.as_millis();
            assert!((800..=1200).contains(&ms), "jittered sleep {ms}ms out of bounds");
        }
    }

    #[tokio::test]
    async fn transient_error_exhausts_retry_budget() {
        let executor = RetryExecutor::new(fast_policy());
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = executor
            .execute(|| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { Err(TestError::Transient) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 4);
    }
}
