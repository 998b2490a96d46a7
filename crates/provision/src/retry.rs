//! Retry with capped exponential backoff for eventually consistent calls.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, backoff::Backoff};
use launchpad_core::RetryConfig;
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::CloudError;

/// Backoff parameters for one class of calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap for any single delay
    pub max_delay: Duration,
    /// Growth factor between delays
    pub multiplier: f64,
    /// Randomisation factor within [0, 1]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits, for tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.jitter)
            .with_max_elapsed_time(None) // bounded by max_attempts instead
            .build()
    }
}

/// Waits between attempts. Injected so tests can run without real time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Why a retried operation gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// The error is not retryable.
    #[error(transparent)]
    Fatal(CloudError),

    /// Every attempt failed with a retryable error.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Operation name
        operation: String,
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: CloudError,
    },
}

impl RetryError {
    /// The underlying cloud error.
    #[must_use]
    pub const fn cloud_error(&self) -> &CloudError {
        match self {
            Self::Fatal(err) | Self::Exhausted { last_error: err, .. } => err,
        }
    }
}

/// Retry `f` while it fails with a retryable [`CloudError`].
///
/// # Errors
///
/// Returns [`RetryError::Fatal`] for the first non-retryable error and
/// [`RetryError::Exhausted`] once `policy.max_attempts` attempts have failed.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut f: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CloudError>>,
{
    let mut backoff = policy.backoff();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation, attempts, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if !err.is_retryable() => {
                debug!(operation, error = %err, "Error is not retryable, failing immediately");
                return Err(RetryError::Fatal(err));
            }
            Err(err) => {
                let delay = if attempts >= policy.max_attempts {
                    None
                } else {
                    backoff.next_backoff()
                };
                let Some(delay) = delay else {
                    warn!(operation, attempts, error = %err, "Operation failed after maximum retries");
                    return Err(RetryError::Exhausted {
                        operation: operation.to_string(),
                        attempts,
                        last_error: err,
                    });
                };
                debug!(
                    operation,
                    attempts,
                    error = %err,
                    retry_in_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                sleeper.sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorded(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Sleeper for Recorded {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let sleeper = Recorded::default();
        let result = retry_with_backoff(&policy(3), &sleeper, "test", || async {
            Ok::<_, CloudError>(42)
        })
        .await;
        assert_eq!(result, Ok(42));
        assert!(sleeper.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_success_after_not_found() {
        let sleeper = Recorded::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = retry_with_backoff(&policy(5), &sleeper, "test", move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CloudError::not_found("sa"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let delays: Vec<u128> = sleeper.0.lock().unwrap().iter().map(Duration::as_millis).collect();
        assert_eq!(delays, vec![100, 200]);
    }

    #[tokio::test]
    async fn test_delays_are_capped() {
        let sleeper = Recorded::default();
        let result: Result<(), _> = retry_with_backoff(&policy(5), &sleeper, "test", || async {
            Err(CloudError::transient("busy"))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 5, .. })));
        let delays = sleeper.0.lock().unwrap().clone();
        assert_eq!(delays.len(), 4);
        assert!(delays.iter().all(|d| d.as_millis() <= 300));
    }

    #[tokio::test]
    async fn test_permission_denied_not_retried() {
        let sleeper = Recorded::default();
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy(5), &sleeper, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(CloudError::PermissionDenied {
                    message: "iam.serviceAccounts.create denied".to_string(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Fatal(CloudError::PermissionDenied { .. })));
        assert!(err.to_string().contains("iam.serviceAccounts.create denied"));
    }
}
