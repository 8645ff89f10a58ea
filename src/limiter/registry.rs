use super::sweeper::SweepHandle;
use super::{BucketKind, Decision, TokenBucket, NORMAL_SEND_PERIOD, TEST_SEND_PERIOD};
use crate::clock::Clock;
use crate::telemetry::{EventEmitter, LimiterEvent, MailEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Refill periods and sweep cadence for the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    normal_period: Duration,
    test_period: Duration,
    sweep_interval: Duration,
}

/// Rejected limiter configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LimiterConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

impl LimiterConfig {
    /// Build a config, rejecting zero durations.
    pub fn new(
        normal_period: Duration,
        test_period: Duration,
        sweep_interval: Duration,
    ) -> Result<Self, LimiterConfigError> {
        if normal_period.is_zero() {
            return Err(LimiterConfigError::ZeroDuration("normal_period"));
        }
        if test_period.is_zero() {
            return Err(LimiterConfigError::ZeroDuration("test_period"));
        }
        if sweep_interval.is_zero() {
            return Err(LimiterConfigError::ZeroDuration("sweep_interval"));
        }
        Ok(Self { normal_period, test_period, sweep_interval })
    }

    pub fn normal_period(&self) -> Duration {
        self.normal_period
    }

    pub fn test_period(&self) -> Duration {
        self.test_period
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Refill period for `kind`.
    pub fn period(&self, kind: BucketKind) -> Duration {
        match kind {
            BucketKind::Normal => self.normal_period,
            BucketKind::Test => self.test_period,
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            normal_period: NORMAL_SEND_PERIOD,
            test_period: TEST_SEND_PERIOD,
            sweep_interval: NORMAL_SEND_PERIOD,
        }
    }
}

/// Limiter state for one identity.
#[derive(Debug)]
pub struct VisitorEntry {
    normal: Mutex<TokenBucket>,
    test: Mutex<TokenBucket>,
    last_seen: AtomicU64,
}

impl VisitorEntry {
    fn new(config: &LimiterConfig, now_millis: u64) -> Self {
        Self {
            normal: Mutex::new(TokenBucket::full(config.normal_period, now_millis)),
            test: Mutex::new(TokenBucket::full(config.test_period, now_millis)),
            last_seen: AtomicU64::new(now_millis),
        }
    }

    /// Last access time in milliseconds since the epoch.
    pub fn last_seen_millis(&self) -> u64 {
        self.last_seen.load(Ordering::Acquire)
    }

    fn mark_seen(&self, now_millis: u64) {
        self.last_seen.fetch_max(now_millis, Ordering::AcqRel);
    }

    fn bucket(&self, kind: BucketKind) -> &Mutex<TokenBucket> {
        match kind {
            BucketKind::Normal => &self.normal,
            BucketKind::Test => &self.test,
        }
    }
}

/// Identity-keyed limiter entries with lazy creation and idle eviction.
///
/// The registry owns its sweep task: [`LimiterRegistry::start`] spawns it and
/// [`LimiterRegistry::shutdown`] (or dropping the last `Arc`) stops it.
pub struct LimiterRegistry {
    entries: Mutex<HashMap<String, Arc<VisitorEntry>>>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    events: EventEmitter,
    sweeper: Mutex<Option<SweepHandle>>,
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("entries", &self.len())
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish()
    }
}

impl LimiterRegistry {
    /// A registry with no sweep task. Call [`start`](Self::start) to run one.
    pub fn new(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            clock,
            events: EventEmitter::null(),
            sweeper: Mutex::new(None),
        }
    }

    /// Attach a telemetry emitter for sweep events.
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Wrap the registry in an `Arc` and spawn its periodic sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Arc<Self> {
        let registry = Arc::new(self);
        let handle = SweepHandle::spawn(Arc::downgrade(&registry), registry.config.sweep_interval);
        *registry.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        registry
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub(crate) fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Return the entry for `identity`, creating it with full buckets if absent.
    ///
    /// Always refreshes `last_seen`.
    pub fn acquire(&self, identity: &str) -> Arc<VisitorEntry> {
        let now = self.clock.now_millis();
        let mut entries = self.lock_entries();
        if let Some(entry) = entries.get(identity) {
            entry.mark_seen(now);
            return Arc::clone(entry);
        }
        let entry = Arc::new(VisitorEntry::new(&self.config, now));
        entries.insert(identity.to_string(), Arc::clone(&entry));
        tracing::debug!(identity, "limiter entry created");
        entry
    }

    /// Refresh `last_seen` for an existing entry. No-op when absent.
    pub fn touch(&self, identity: &str) {
        let now = self.clock.now_millis();
        if let Some(entry) = self.lock_entries().get(identity) {
            entry.mark_seen(now);
        }
    }

    /// Remove the entry for `identity`, returning whether one existed.
    pub fn evict(&self, identity: &str) -> bool {
        let removed = self.lock_entries().remove(identity).is_some();
        if removed {
            tracing::debug!(identity, "limiter entry evicted");
        }
        removed
    }

    /// Fetch or create the entry for `identity` and take one token from `kind`.
    ///
    /// The bucket is drawn while the map lock is held, so a concurrent
    /// [`evict`](Self::evict) cannot leave the token on a detached entry.
    pub fn consume(&self, identity: &str, kind: BucketKind) -> Decision {
        let now = self.clock.now_millis();
        let mut entries = self.lock_entries();
        let entry = match entries.get(identity) {
            Some(entry) => Arc::clone(entry),
            None => {
                let entry = Arc::new(VisitorEntry::new(&self.config, now));
                entries.insert(identity.to_string(), Arc::clone(&entry));
                tracing::debug!(identity, "limiter entry created");
                entry
            }
        };
        entry.mark_seen(now);
        let mut bucket = entry.bucket(kind).lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_take(now)
    }

    /// Take one token from `kind` on `entry`.
    ///
    /// The entry may have been evicted since it was acquired; use
    /// [`consume`](Self::consume) when admission must match the map.
    pub fn try_consume(&self, entry: &VisitorEntry, kind: BucketKind) -> Decision {
        let now = self.clock.now_millis();
        entry.mark_seen(now);
        let mut bucket = entry.bucket(kind).lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_take(now)
    }

    /// Drop every entry idle for longer than the normal refill period.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let max_idle = u64::try_from(self.config.normal_period.as_millis()).unwrap_or(u64::MAX);
        let (removed, remaining) = {
            let mut entries = self.lock_entries();
            let before = entries.len();
            entries.retain(|_, entry| now.saturating_sub(entry.last_seen_millis()) <= max_idle);
            (before - entries.len(), entries.len())
        };
        if removed > 0 {
            tracing::info!(removed, remaining, "swept idle limiter entries");
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) and report it to telemetry.
    pub(crate) async fn sweep_and_report(&self) -> usize {
        let removed = self.sweep();
        let remaining = self.len();
        self.events.emit(MailEvent::Limiter(LimiterEvent::Swept { removed, remaining })).await;
        removed
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock_entries().contains_key(identity)
    }

    /// `last_seen` for `identity`, if tracked.
    pub fn last_seen_millis(&self, identity: &str) -> Option<u64> {
        self.lock_entries().get(identity).map(|entry| entry.last_seen_millis())
    }

    /// Stop the sweep task and wait for it to exit. Idempotent.
    pub async fn shutdown(&self) {
        let handle = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.shutdown().await {
                tracing::warn!(error = %err, "limiter sweep task did not exit cleanly");
            }
        }
    }

    /// True while a sweep task is attached.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<VisitorEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
