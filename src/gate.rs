//! Admission control in front of every send.
//!
//! The gate turns a request classification into a bucket draw, rejects when
//! the bucket is empty, and refunds the identity (by evicting its limiter
//! entry) when anything after admission fails.

use crate::error::MailError;
use crate::limiter::{BucketKind, Decision, LimiterRegistry};
use crate::telemetry::{EventEmitter, LimiterEvent, MailEvent};
use std::future::Future;
use std::sync::Arc;

/// How a send request is classified for quota purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    /// Immediate listserv mail.
    Normal,
    /// Test mail to the composer only.
    Test,
    /// Listserv mail stored for later delivery. Not metered.
    Scheduled,
}

impl SendKind {
    /// The bucket this kind draws from, or `None` when it is not metered.
    pub fn bucket(self) -> Option<BucketKind> {
        match self {
            SendKind::Normal => Some(BucketKind::Normal),
            SendKind::Test => Some(BucketKind::Test),
            SendKind::Scheduled => None,
        }
    }
}

/// Outcome of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A token was consumed from the bucket.
    Charged(BucketKind),
    /// Bypass mode; no limiter state was touched.
    Bypassed,
    /// The request kind carries no quota; no limiter state was touched.
    Exempt,
}

impl Admission {
    pub fn is_charged(self) -> bool {
        matches!(self, Admission::Charged(_))
    }
}

#[derive(Debug, Clone)]
pub struct SendGate {
    registry: Arc<LimiterRegistry>,
    bypass: bool,
    events: EventEmitter,
}

impl SendGate {
    pub fn new(registry: Arc<LimiterRegistry>) -> Self {
        let events = registry.events().clone();
        Self { registry, bypass: false, events }
    }

    /// Admit every request without consulting the limiter.
    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Consume one token for `kind`, or fail with [`MailError::RateLimited`].
    ///
    /// Scheduled requests are admitted as [`Admission::Exempt`] without
    /// creating or refreshing a limiter entry.
    pub async fn admit(&self, identity: &str, kind: SendKind) -> Result<Admission, MailError> {
        if identity.is_empty() {
            return Err(MailError::validation("An identity is required to send mail."));
        }
        if self.bypass {
            self.events
                .emit(MailEvent::Limiter(LimiterEvent::Bypassed { identity: identity.to_string() }))
                .await;
            return Ok(Admission::Bypassed);
        }

        let Some(bucket) = kind.bucket() else {
            tracing::debug!(identity, ?kind, "unmetered send admitted");
            return Ok(Admission::Exempt);
        };
        match self.registry.consume(identity, bucket) {
            Decision::Allowed => {
                tracing::debug!(identity, %bucket, "send admitted");
                self.events
                    .emit(MailEvent::Limiter(LimiterEvent::Admitted {
                        identity: identity.to_string(),
                        bucket,
                    }))
                    .await;
                Ok(Admission::Charged(bucket))
            }
            Decision::Denied { wait } => {
                tracing::info!(identity, %bucket, wait_secs = wait.as_secs(), "send rate limited");
                self.events
                    .emit(MailEvent::Limiter(LimiterEvent::Rejected {
                        identity: identity.to_string(),
                        bucket,
                        wait,
                    }))
                    .await;
                Err(MailError::RateLimited { bucket, wait })
            }
        }
    }

    /// Give back an admission by evicting the identity's limiter entry.
    ///
    /// Resets both buckets, not just the one that was charged.
    pub async fn refund(&self, identity: &str, admission: Admission) {
        if !admission.is_charged() {
            return;
        }
        if self.registry.evict(identity) {
            tracing::info!(identity, "send refunded after downstream failure");
            self.events
                .emit(MailEvent::Limiter(LimiterEvent::Refunded { identity: identity.to_string() }))
                .await;
        }
    }

    /// Admit, run `op`, and refund if `op` fails.
    pub async fn execute<T, Fut, Op>(
        &self,
        identity: &str,
        kind: SendKind,
        op: Op,
    ) -> Result<T, MailError>
    where
        Fut: Future<Output = Result<T, MailError>>,
        Op: FnOnce() -> Fut,
    {
        let admission = self.admit(identity, kind).await?;
        match op().await {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(identity, error = %err, "send failed after admission");
                self.refund(identity, admission).await;
                Err(err)
            }
        }
    }
}
