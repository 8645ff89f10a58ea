//! Document store port for scheduled messages and digest entries.

use crate::digest::DigestEntry;
use crate::error::StoreError;
use crate::schedule::ScheduledMessage;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use uuid::Uuid;

pub mod memory;

pub use memory::InMemoryMailStore;

/// Abstract storage for mail records.
///
/// Implementations must reject a second scheduled message for the same
/// (identity, send instant) with [`StoreError::Duplicate`], and a second digest
/// entry for the same identity likewise. Timestamps compare as instants, so
/// the same moment written with different offsets is the same key.
#[async_trait]
pub trait MailStore: Send + Sync + std::fmt::Debug {
    /// Scheduled message owned by `identity` at exactly `send_at`.
    async fn find_scheduled(
        &self,
        identity: &str,
        send_at: &DateTime<FixedOffset>,
    ) -> Result<Option<ScheduledMessage>, StoreError>;

    /// Every scheduled message owned by `identity`, ascending by send time.
    async fn list_scheduled(&self, identity: &str) -> Result<Vec<ScheduledMessage>, StoreError>;

    async fn insert_scheduled(&self, message: ScheduledMessage) -> Result<(), StoreError>;

    /// Remove by record id. Returns whether a record was removed.
    async fn delete_scheduled(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Every scheduled message with `send_at <= cutoff`, ascending by send time.
    async fn due_scheduled(
        &self,
        cutoff: &DateTime<FixedOffset>,
    ) -> Result<Vec<ScheduledMessage>, StoreError>;

    async fn find_digest(&self, identity: &str) -> Result<Option<DigestEntry>, StoreError>;

    async fn insert_digest(&self, entry: DigestEntry) -> Result<(), StoreError>;

    /// Remove the identity's digest entry. Returns whether one was removed.
    async fn delete_digest(&self, identity: &str) -> Result<bool, StoreError>;

    /// Claim the right to run a dispatch scan over this store.
    ///
    /// `Ok(None)` while another scanner holds the claim. Stores shared between
    /// processes must make the claim visible to all of them.
    async fn claim_dispatch(&self) -> Result<Option<DispatchClaim>, StoreError> {
        Ok(Some(DispatchClaim::unguarded()))
    }
}

/// Held for the length of one dispatch scan; released on drop.
pub struct DispatchClaim {
    guard: Option<Box<dyn Send + Sync>>,
}

impl DispatchClaim {
    /// A claim that excludes nobody.
    pub fn unguarded() -> Self {
        Self { guard: None }
    }

    /// A claim released when `guard` drops.
    pub fn holding<G: Send + Sync + 'static>(guard: G) -> Self {
        Self { guard: Some(Box::new(guard)) }
    }
}

impl std::fmt::Debug for DispatchClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchClaim").field("guarded", &self.guard.is_some()).finish()
    }
}
