//! Bounded retry with exponential backoff for catalog calls.
//!
//! [`retry`] wraps any async call. Only the wrapped call sleeps between
//! attempts; nothing else in the process is paused.

use crate::{CatalogError, Result};
use std::future::Future;
use std::time::Duration;

/// How many times to attempt a call and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for the computed backoff.
    pub max_delay: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.5)`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Retry without waiting. Useful for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Backoff after the `failed_attempt`-th failure (1-based), before jitter.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    fn delay_for(&self, failed_attempt: u32, err: &CatalogError) -> Duration {
        let mut delay = self.backoff(failed_attempt);
        if self.jitter && !delay.is_zero() {
            delay = delay.mul_f64(0.5 + fastrand::f64());
        }
        // The server's hint is a floor, not a suggestion.
        match err.retry_after() {
            Some(hint) => delay.max(hint),
            None => delay,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `call` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_if(policy, operation, CatalogError::is_transient, call).await
}

/// Like [`retry`], with a caller-supplied predicate deciding which errors
/// are worth another attempt.
pub async fn retry_if<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: P,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&CatalogError) -> bool,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < attempts && is_retryable(&err) => {
                let delay = policy.delay_for(attempt, &err);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retryable catalog error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    tracing::warn!(operation, attempt, error = %err, "Giving up on call");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy =
            RetryPolicy::new(5, Duration::from_secs(1)).with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2));
        let err = CatalogError::transient("x");
        for _ in 0..100 {
            let delay = policy.delay_for(1, &err);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_secs(3));
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry(&RetryPolicy::immediate(5), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CatalogError::transient("blip"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(&RetryPolicy::immediate(4), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CatalogError::transient("still down")) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let calls = AtomicU32::new(0);
        let _: Result<()> = retry(&RetryPolicy::immediate(0), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CatalogError::transient("x")) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_and_fatal_are_not_retried() {
        for err in [CatalogError::not_found("p1"), CatalogError::fatal("403")] {
            let calls = AtomicU32::new(0);
            let result: Result<()> = retry(&RetryPolicy::immediate(5), "op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                let err = err.clone();
                async move { Err(err) }
            })
            .await;

            assert_eq!(result, Err(err));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn custom_predicate_controls_retries() {
        let calls = AtomicU32::new(0);
        let _: Result<()> = retry_if(&RetryPolicy::immediate(3), "op", |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CatalogError::not_found("p1")) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_grow_exponentially() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1)).without_jitter();
        let started = Instant::now();

        let _: Result<()> = retry(&policy, "op", || async {
            Err(CatalogError::transient("down"))
        })
        .await;

        // 1s after the first failure, 2s after the second, none after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3_100));
    }

    #[tokio::test(start_paused = true)]
    async fn server_hint_extends_delay() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10)).without_jitter();
        let started = Instant::now();

        let _: Result<()> = retry(&policy, "op", || async {
            Err(CatalogError::rate_limited("429", Duration::from_secs(4)))
        })
        .await;

        assert!(started.elapsed() >= Duration::from_secs(4));
    }
}
