//! Retry engine for official academic APIs.
//!
//! Wraps a fallible async call with classified retries, exponential
//! backoff, and a consecutive-429 early-fail ceiling. The engine never
//! retries internally-permanent failures and never sleeps after deciding
//! not to retry. When a provider name is supplied, success/429 outcomes are
//! reported to the [`crate::client::rate_limiter::AcademicRateLimiter`] so
//! it can adapt its throttle.

use std::collections::BTreeSet;
use std::future::Future;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::client::rate_limiter::get_academic_rate_limiter;
use crate::config::ensure_disjoint_status_sets;
use crate::resilience::backoff::{backoff_duration, BackoffConfig};
use crate::{Error, Result};

/// Retry policy: attempt ceiling, backoff curve, and the status-code
/// classification tables. The retryable and non-retryable sets are
/// validated to be disjoint at construction.
#[derive(Debug, Clone)]
pub struct ApiRetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffConfig,
    retryable_status: BTreeSet<u16>,
    non_retryable_status: BTreeSet<u16>,
}

impl Default for ApiRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffConfig::default(),
            retryable_status: default_retryable(),
            non_retryable_status: default_non_retryable(),
        }
    }
}

fn default_retryable() -> BTreeSet<u16> {
    [429, 500, 502, 503, 504].into_iter().collect()
}

fn default_non_retryable() -> BTreeSet<u16> {
    [400, 401, 403, 404, 410].into_iter().collect()
}

impl ApiRetryPolicy {
    /// Build a policy with custom status sets, rejecting overlap and
    /// invalid backoff parameters.
    pub fn new(
        max_retries: u32,
        backoff: BackoffConfig,
        retryable_status: BTreeSet<u16>,
        non_retryable_status: BTreeSet<u16>,
    ) -> Result<Self> {
        backoff.validate()?;
        ensure_disjoint_status_sets(&retryable_status, &non_retryable_status)?;
        Ok(Self {
            max_retries,
            backoff,
            retryable_status,
            non_retryable_status,
        })
    }

    /// Policy variant with only the attempt ceiling changed.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Policy variant with a different backoff curve. The curve should
    /// already satisfy [`BackoffConfig::validate`].
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether an HTTP status code should be retried. Unknown codes are
    /// not retried.
    #[must_use]
    pub fn should_retry_status(&self, status: u16) -> bool {
        if self.non_retryable_status.contains(&status) {
            return false;
        }
        self.retryable_status.contains(&status)
    }

    /// Whether an error is retryable: transient network failures always,
    /// status-bearing errors per the classification tables, everything
    /// else never.
    #[must_use]
    pub fn should_retry_error(&self, error: &Error) -> bool {
        if let Some(status) = error.status() {
            return self.should_retry_status(status);
        }
        error.is_network()
    }
}

/// Preset for academic metadata APIs: more attempts and a higher delay cap
/// than the general default.
#[must_use]
pub fn academic_api_policy() -> ApiRetryPolicy {
    ApiRetryPolicy {
        max_retries: 5,
        backoff: BackoffConfig {
            base_delay: 1.0,
            max_delay: 120.0,
            ..BackoffConfig::default()
        },
        retryable_status: default_retryable(),
        non_retryable_status: default_non_retryable(),
    }
}

/// Execute `operation` with retry semantics.
///
/// * Retryable failures sleep `backoff(attempt)` then try again, up to
///   `max_retries + 1` total attempts.
/// * Non-retryable failures are rethrown immediately, without sleeping.
/// * A streak of 429 responses reaching the provider's consecutive-429
///   ceiling fails immediately with [`Error::RetryExhausted`] carrying
///   `last_status = 429`, without sleeping. Any non-429 outcome resets the
///   streak.
/// * When `provider` is given, outcomes feed the global rate limiter's
///   adaptive throttle, and the ceiling honors the provider's profile.
///
/// The operation itself must hold rate-limit permits only for the duration
/// of one attempt, so that backoff sleeps never pin a concurrency slot.
pub async fn retry_api_call<T, F, Fut>(
    operation: F,
    policy: &ApiRetryPolicy,
    provider: Option<&str>,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let limiter = get_academic_rate_limiter();
    let max_consecutive_429 = match provider {
        Some(p) => limiter.max_consecutive_429_for(p).await,
        None => limiter.base_max_consecutive_429(),
    };

    let mut local_429_streak: u32 = 0;
    let mut last_status: Option<u16> = None;
    let mut last_message = String::new();

    for attempt in 0..=policy.max_retries {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = operation_name, attempts = attempt + 1, "succeeded after retries");
                }
                if let Some(p) = provider {
                    limiter.record_success(p).await;
                }
                return Ok(value);
            }
            Err(error) => {
                let status = error.status();
                last_status = status;
                last_message = error.to_string();

                if status == Some(429) {
                    local_429_streak += 1;
                    let streak = match provider {
                        Some(p) => limiter.record_429(p).await,
                        None => local_429_streak,
                    };
                    if streak >= max_consecutive_429 {
                        warn!(
                            operation = operation_name,
                            streak,
                            ceiling = max_consecutive_429,
                            "consecutive 429 ceiling reached, failing early"
                        );
                        return Err(Error::RetryExhausted {
                            operation: operation_name.to_string(),
                            attempts: attempt + 1,
                            last_status: Some(429),
                            message: last_message,
                        });
                    }
                } else {
                    local_429_streak = 0;
                    if let Some(p) = provider {
                        limiter.reset_429_streak(p).await;
                    }
                }

                if !policy.should_retry_error(&error) {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        error = %error,
                        "non-retryable error"
                    );
                    return Err(error);
                }

                if attempt >= policy.max_retries {
                    break;
                }

                let delay = backoff_duration(attempt, &policy.backoff);
                debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after failure"
                );
                sleep(delay).await;
            }
        }
    }

    Err(Error::RetryExhausted {
        operation: operation_name.to_string(),
        attempts: policy.max_retries + 1,
        last_status,
        message: last_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn fast_policy(max_retries: u32) -> ApiRetryPolicy {
        ApiRetryPolicy {
            max_retries,
            backoff: BackoffConfig {
                base_delay: 0.001,
                max_delay: 0.01,
                jitter_factor: 0.0,
                ..BackoffConfig::default()
            },
            ..ApiRetryPolicy::default()
        }
    }

    fn status_err(code: u16) -> Error {
        Error::Status {
            code,
            message: format!("HTTP {code}"),
        }
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let result = retry_api_call(
            || async { Ok::<u32, Error>(42) },
            &fast_policy(3),
            None,
            "test_op",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result = retry_api_call(
            move || {
                let count = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(status_err(503))
                    } else {
                        Ok(7u32)
                    }
                }
            },
            &fast_policy(3),
            None,
            "test_op",
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let start = Instant::now();
        let result: Result<u32> = retry_api_call(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async move { Err(status_err(404)) }
            },
            &fast_policy(5),
            None,
            "test_op",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // No backoff sleep may have happened
        assert!(start.elapsed().as_millis() < 50);
        assert_eq!(result.unwrap_err().status(), Some(404));
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_status() {
        let result: Result<u32> = retry_api_call(
            || async { Err(status_err(500)) },
            &fast_policy(2),
            None,
            "test_op",
        )
        .await;
        match result.unwrap_err() {
            Error::RetryExhausted {
                attempts,
                last_status,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_status, Some(500));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn consecutive_429_ceiling_fails_early_without_extra_sleep() {
        // Anonymous default ceiling is 2: the second 429 must abort even
        // though max_retries would allow many more attempts.
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<u32> = retry_api_call(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async move { Err(status_err(429)) }
            },
            &fast_policy(10),
            None,
            "test_op",
        )
        .await;
        match result.unwrap_err() {
            Error::RetryExhausted {
                attempts,
                last_status,
                ..
            } => {
                assert_eq!(last_status, Some(429));
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_429_outcome_resets_streak() {
        // 429, 503, 429, 429 with ceiling 2: the mid-stream 503 resets the
        // streak, so the ceiling trips only on the final pair.
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<u32> = retry_api_call(
            move || {
                let count = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    match count {
                        1 => Err(status_err(503)),
                        _ => Err(status_err(429)),
                    }
                }
            },
            &fast_policy(10),
            None,
            "test_op",
        )
        .await;
        assert_eq!(result.unwrap_err().status(), Some(429));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn network_errors_are_retryable() {
        let policy = fast_policy(1);
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<u32> = retry_api_call(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(Error::Timeout {
                        operation: "fetch".to_string(),
                        seconds: 1.0,
                    })
                }
            },
            &policy,
            None,
            "test_op",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn overlapping_sets_rejected_at_construction() {
        let retryable: BTreeSet<u16> = [429, 500].into_iter().collect();
        let non_retryable: BTreeSet<u16> = [429, 404].into_iter().collect();
        let result = ApiRetryPolicy::new(
            3,
            BackoffConfig::default(),
            retryable,
            non_retryable,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_status_not_retried() {
        let policy = ApiRetryPolicy::default();
        assert!(!policy.should_retry_status(418));
        assert!(policy.should_retry_status(429));
        assert!(policy.should_retry_status(502));
        assert!(!policy.should_retry_status(404));
    }
}
