//! Bounded exponential backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use crate::provider::ProviderError;

/// Attempt budget for one provider call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; values below one act as one.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound of the doubling delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt budget and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }
}

/// Runs `operation`, retrying while it fails transiently.
///
/// Non-transient errors return immediately. When the budget is spent the
/// last transient error is returned, which callers surface as
/// `UNAVAILABLE`.
///
/// # Errors
///
/// Returns the final [`ProviderError`] produced by `operation`.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0_u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                error!(
                    operation = %operation_name,
                    attempt,
                    error = %err,
                    "provider call failed after max retries"
                );
                return Err(err);
            }
            Err(err) => {
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis(),
                    "provider call failed, retrying"
                );
                sleep(delay).await;
                delay = delay.saturating_mul(2).min(policy.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retry_transient(&fast(5), "op", || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(ProviderError::RateLimited {
                        message: String::from("slow down"),
                    })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), ProviderError> = retry_transient(&fast(3), "op", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::Unavailable {
                    message: String::from("503"),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Unavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), ProviderError> = retry_transient(&fast(5), "op", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::Rejected {
                    code: String::from("invalid_input"),
                    message: String::from("size"),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
