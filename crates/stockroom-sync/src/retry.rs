//! # Retry Policy
//!
//! Bounded retry with exponential backoff for single remote calls.
//!
//! ## Timeline (defaults: 3 attempts, base 1000ms)
//! ```text
//! attempt 1 ──fail──► wait 2s ──► attempt 2 ──fail──► wait 4s ──► attempt 3 ──fail──► give up
//!     │                               │                               │
//!     └── success: return             └── success: return             └── op stays queued
//!
//! A permanent error (RemoteError::Rejected) stops immediately at any attempt,
//! unless the policy retries rejections (dead-lettering turned off).
//! ```
//!
//! Delays come from `backoff::ExponentialBackoff` with zero jitter, so the
//! k-th retry waits exactly `base_delay * 2^k`.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use crate::error::RemoteError;

/// How often and how patiently a single operation is retried within a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Back off and retry `Rejected` errors like transient ones.
    pub retry_rejections: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            retry_rejections: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            retry_rejections: false,
        }
    }

    pub fn retry_rejections(mut self, retry: bool) -> Self {
        self.retry_rejections = retry;
        self
    }

    /// Delay before retry `k` (1-based): `base_delay * 2^k`.
    pub fn delay_before_retry(&self, k: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(k))
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        let first = self.delay_before_retry(1);
        ExponentialBackoff {
            current_interval: first,
            initial_interval: first,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: Duration::from_secs(24 * 60 * 60),
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Runs `call` until it succeeds, fails permanently, or attempts run out.
///
/// `call` receives the 1-based attempt number.
pub async fn retry_with_policy<T, F, Fut>(policy: &RetryPolicy, mut call: F) -> Result<T, RemoteError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut backoff = policy.create_backoff();
    let mut attempt = 1;

    loop {
        match call(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Remote call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_permanent() && !policy.retry_rejections => {
                debug!(attempt, error = %err, "Permanent remote error, not retrying");
                return Err(err);
            }
            Err(err) if attempt >= policy.max_attempts => {
                warn!(attempts = attempt, error = %err, "Retries exhausted");
                return Err(err);
            }
            Err(err) => {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or_else(|| policy.delay_before_retry(attempt));
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Remote call failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn unavailable() -> RemoteError {
        RemoteError::Unavailable("connection refused".into())
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_before_retry(2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_has_no_jitter() {
        let policy = RetryPolicy::default();
        let mut backoff = policy.create_backoff();
        let first = backoff.next_backoff().unwrap();
        let second = backoff.next_backoff().unwrap();
        assert!(first >= Duration::from_secs(2) && first < Duration::from_millis(2001));
        assert!(second >= Duration::from_secs(4) && second < Duration::from_millis(4001));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_call_is_attempted_max_times_with_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: Result<(), _> = retry_with_policy(&RetryPolicy::default(), |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            }
        })
        .await;

        assert!(matches!(result, Err(RemoteError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // 2s + 4s of backoff, nothing before the first attempt.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(7), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure() {
        let started = Instant::now();

        let result = retry_with_policy(&RetryPolicy::default(), |attempt| async move {
            if attempt < 2 {
                Err(RemoteError::Server {
                    status: 503,
                    message: "unavailable".into(),
                })
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: Result<(), _> = retry_with_policy(&RetryPolicy::default(), |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Rejected {
                    status: 422,
                    message: "invalid".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(RemoteError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_retried_when_policy_allows() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default().retry_rejections(true);

        let result: Result<(), _> = retry_with_policy(&policy, |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Rejected {
                    status: 422,
                    message: "invalid".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(RemoteError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_new_clamps_to_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::from_millis(1)).max_attempts, 1);
    }
}
