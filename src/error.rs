//! Error types for the send pipeline.
use crate::limiter::BucketKind;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for every mail operation.
#[derive(Debug, Error)]
pub enum MailError {
    /// Malformed or out-of-range input. Always reported to the user.
    #[error("{0}")]
    Validation(String),
    /// The identity's send quota for the bucket is exhausted.
    #[error("{}", rate_limit_message(.bucket))]
    RateLimited { bucket: BucketKind, wait: Duration },
    /// A conflicting record already exists (duplicate scheduled send, second digest).
    #[error("{0}")]
    Conflict(String),
    /// The caller could not be identified.
    #[error("{0}")]
    Unauthenticated(String),
    /// An external call exceeded its time budget.
    #[error("{operation} timed out after {elapsed:?} (limit: {timeout:?})")]
    Timeout { operation: &'static str, elapsed: Duration, timeout: Duration },
    /// The document store failed.
    #[error("mail service had an error: {0}")]
    Store(#[from] StoreError),
    /// The email provider failed.
    #[error("mail service had an error: {0}")]
    Delivery(#[from] DeliveryError),
}

fn rate_limit_message(bucket: &BucketKind) -> &'static str {
    match bucket {
        BucketKind::Normal => {
            "You have reached your send limit. You can only send one email every 6 hours. \
             If you need to send an email urgently, please contact the mail team."
        }
        BucketKind::Test => {
            "You have reached your send limit. You can only send one test email every 1 minute."
        }
    }
}

impl MailError {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for a conflict.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Check if this error is a rejected input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this error is due to an exhausted quota.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Check if this error is a duplicate-record conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Check if this error came from the store, the provider or a timeout.
    ///
    /// These are retryable: immediate paths surface them, the batch path retries next scan.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Store(_) | Self::Delivery(_))
    }

    /// How long the caller should wait before retrying, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { wait, .. } => Some(*wait),
            _ => None,
        }
    }
}

/// Failures reported by a [`MailStore`](crate::store::MailStore).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Insert violated the (identity, key) uniqueness constraint.
    #[error("a record for {identity} already exists at {key}")]
    Duplicate { identity: String, key: String },
    /// The backend could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Failures reported by an [`EmailSender`](crate::sender::EmailSender).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The provider could not be reached.
    #[error("email provider unreachable: {0}")]
    Transport(String),
    /// The provider answered but did not accept the message.
    #[error("email provider rejected the message: {0}")]
    Rejected(String),
}
