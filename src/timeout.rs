//! Time budgets for external calls.

use crate::error::MailError;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Store operations: 5 seconds.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Provider sends: 10 seconds.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// A timeout that cannot bound anything.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("{operation} timeout must be non-zero and finite, got {duration:?}")]
pub struct InvalidTimeout {
    pub operation: &'static str,
    pub duration: Duration,
}

/// Bounds one kind of external call.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    operation: &'static str,
    duration: Duration,
}

impl TimeoutPolicy {
    /// Create a timeout policy. Panics if duration is zero or `Duration::MAX`.
    ///
    /// Use [`try_new`](Self::try_new) for durations that come from configuration.
    pub fn new(operation: &'static str, duration: Duration) -> Self {
        assert!(
            duration > Duration::ZERO && duration < Duration::MAX,
            "timeout duration must be non-zero and finite",
        );
        Self { operation, duration }
    }

    pub fn try_new(operation: &'static str, duration: Duration) -> Result<Self, InvalidTimeout> {
        if duration.is_zero() || duration == Duration::MAX {
            return Err(InvalidTimeout { operation, duration });
        }
        Ok(Self { operation, duration })
    }

    pub fn store(duration: Duration) -> Self {
        Self::new("store", duration)
    }

    pub fn send(duration: Duration) -> Self {
        Self::new("send", duration)
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run `operation`, converting its error into a [`MailError`] and reporting
    /// an overrun as [`MailError::Timeout`].
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, MailError>
    where
        E: Into<MailError>,
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.duration, operation()).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                let elapsed = start.elapsed();
                tracing::warn!(
                    operation = self.operation,
                    timeout_ms = self.duration.as_millis() as u64,
                    "external call timed out"
                );
                Err(MailError::Timeout { operation: self.operation, elapsed, timeout: self.duration })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeliveryError, StoreError};

    #[tokio::test]
    async fn completes_before_timeout() {
        let policy = TimeoutPolicy::store(Duration::from_millis(100));
        let result = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, StoreError>(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_is_reported_with_operation_name() {
        let policy = TimeoutPolicy::send(Duration::from_millis(50));
        let result = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<(), DeliveryError>(())
            })
            .await;

        match result.unwrap_err() {
            MailError::Timeout { operation, timeout, .. } => {
                assert_eq!(operation, "send");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            e => panic!("Expected Timeout error, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn inner_errors_convert() {
        let policy = TimeoutPolicy::store(Duration::from_secs(1));
        let result = policy
            .execute(|| async { Err::<(), _>(StoreError::Unavailable("down".into())) })
            .await;
        assert!(matches!(result.unwrap_err(), MailError::Store(StoreError::Unavailable(_))));
    }

    #[test]
    fn try_new_rejects_unbounded_durations() {
        let err = TimeoutPolicy::try_new("store", Duration::ZERO).unwrap_err();
        assert_eq!(err, InvalidTimeout { operation: "store", duration: Duration::ZERO });
        assert!(err.to_string().contains("store timeout"));
        assert!(TimeoutPolicy::try_new("send", Duration::MAX).is_err());
        assert_eq!(
            TimeoutPolicy::try_new("send", Duration::from_secs(3)).unwrap().duration(),
            Duration::from_secs(3)
        );
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn zero_duration_panics() {
        let _ = TimeoutPolicy::store(Duration::ZERO);
    }
}
