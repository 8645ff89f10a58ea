use super::{DispatchClaim, MailStore};
use crate::digest::DigestEntry;
use crate::error::StoreError;
use crate::schedule::ScheduledMessage;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Records {
    scheduled: Vec<ScheduledMessage>,
    digests: Vec<DigestEntry>,
}

/// Process-local store. Clones share the same records.
#[derive(Default, Clone, Debug)]
pub struct InMemoryMailStore {
    records: Arc<Mutex<Records>>,
    scanning: Arc<AtomicBool>,
}

struct ScanFlag(Arc<AtomicBool>);

impl Drop for ScanFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl InMemoryMailStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored scheduled messages.
    pub fn scheduled_len(&self) -> usize {
        self.lock().scheduled.len()
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sorted(mut messages: Vec<ScheduledMessage>) -> Vec<ScheduledMessage> {
    messages.sort_by_key(|m| m.send_at);
    messages
}

#[async_trait]
impl MailStore for InMemoryMailStore {
    async fn find_scheduled(
        &self,
        identity: &str,
        send_at: &DateTime<FixedOffset>,
    ) -> Result<Option<ScheduledMessage>, StoreError> {
        let guard = self.lock();
        Ok(guard.scheduled.iter().find(|m| m.identity == identity && m.send_at == *send_at).cloned())
    }

    async fn list_scheduled(&self, identity: &str) -> Result<Vec<ScheduledMessage>, StoreError> {
        let owned = self.lock().scheduled.iter().filter(|m| m.identity == identity).cloned().collect();
        Ok(sorted(owned))
    }

    async fn insert_scheduled(&self, message: ScheduledMessage) -> Result<(), StoreError> {
        let mut guard = self.lock();
        if guard
            .scheduled
            .iter()
            .any(|m| m.identity == message.identity && m.send_at == message.send_at)
        {
            return Err(StoreError::Duplicate {
                identity: message.identity,
                key: message.send_at.to_rfc3339(),
            });
        }
        guard.scheduled.push(message);
        Ok(())
    }

    async fn delete_scheduled(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut guard = self.lock();
        let before = guard.scheduled.len();
        guard.scheduled.retain(|m| m.id != id);
        Ok(guard.scheduled.len() != before)
    }

    async fn due_scheduled(
        &self,
        cutoff: &DateTime<FixedOffset>,
    ) -> Result<Vec<ScheduledMessage>, StoreError> {
        let due = self.lock().scheduled.iter().filter(|m| m.send_at <= *cutoff).cloned().collect();
        Ok(sorted(due))
    }

    async fn find_digest(&self, identity: &str) -> Result<Option<DigestEntry>, StoreError> {
        Ok(self.lock().digests.iter().find(|d| d.identity == identity).cloned())
    }

    async fn insert_digest(&self, entry: DigestEntry) -> Result<(), StoreError> {
        let mut guard = self.lock();
        if guard.digests.iter().any(|d| d.identity == entry.identity) {
            return Err(StoreError::Duplicate { identity: entry.identity, key: "digest".into() });
        }
        guard.digests.push(entry);
        Ok(())
    }

    async fn claim_dispatch(&self) -> Result<Option<DispatchClaim>, StoreError> {
        if self.scanning.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Ok(None);
        }
        Ok(Some(DispatchClaim::holding(ScanFlag(self.scanning.clone()))))
    }

    async fn delete_digest(&self, identity: &str) -> Result<bool, StoreError> {
        let mut guard = self.lock();
        let before = guard.digests.len();
        guard.digests.retain(|d| d.identity != identity);
        Ok(guard.digests.len() != before)
    }
}
