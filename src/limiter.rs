//! Per-identity send quotas.
//!
//! This module provides the building blocks for the visitor limiter:
//! - [`TokenBucket`]: refill math for a single capped bucket.
//! - [`LimiterRegistry`]: the identity -> [`VisitorEntry`] map with lazy creation,
//!   last-seen tracking and eviction.
//! - [`SweepHandle`]: the background task that drops idle entries.
//! - [`Decision`]: the result of a consume attempt (Allowed/Denied).
//!
//! # Architecture
//!
//! - **Registry**: a single mutex guards the map, so create-or-fetch is atomic and
//!   there is never more than one entry per identity.
//! - **Buckets**: each entry carries its own locks, so consuming a token never holds
//!   the map lock.
//! - **Sweep**: eviction only looks at each entry's own `last_seen`; an entry touched
//!   within the normal refill period is never removed.

use std::fmt;
use std::time::Duration;

pub mod bucket;
pub mod registry;
pub mod sweeper;

pub use bucket::TokenBucket;
pub use registry::{LimiterConfig, LimiterConfigError, LimiterRegistry, VisitorEntry};
pub use sweeper::{SweepHandle, SweepShutdownError};

/// One token per 6 hours for mail sent to the listservs.
pub const NORMAL_SEND_PERIOD: Duration = Duration::from_secs(6 * 60 * 60);

/// One token per minute for test mail sent back to the composer.
pub const TEST_SEND_PERIOD: Duration = Duration::from_secs(60);

/// Which of an identity's two buckets a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    /// Listserv mail, immediate or scheduled.
    Normal,
    /// Test mail delivered only to the composer.
    Test,
}

impl BucketKind {
    /// Stable lowercase label used in logs and telemetry.
    pub fn label(self) -> &'static str {
        match self {
            BucketKind::Normal => "normal",
            BucketKind::Test => "test",
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The decision returned when consuming from a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A token was taken; the request may proceed.
    Allowed,
    /// The bucket is empty.
    Denied {
        /// How long until the bucket holds a full token again.
        /// Useful for `Retry-After` headers.
        wait: Duration,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}
