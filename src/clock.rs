//! Clock abstractions used by the limiter, the scheduler and the dispatcher.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
///
/// Everything here reads wall-clock time: send schedules are absolute
/// timestamps, and bucket refill only needs millisecond differences.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// Current time as a UTC timestamp.
    fn now(&self) -> DateTime<Utc> {
        let millis = i64::try_from(self.now_millis()).unwrap_or(i64::MAX);
        DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Wall clock backed by `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same underlying time, so advancing one handle moves all of them.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Start the clock at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        let millis = u64::try_from(start.timestamp_millis()).unwrap_or(0);
        Self { millis: Arc::new(AtomicU64::new(millis)) }
    }

    /// Start the clock at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self { millis: Arc::new(AtomicU64::new(SystemClock.now_millis())) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: DateTime<Utc>) {
        let millis = u64::try_from(to.timestamp_millis()).unwrap_or(0);
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances_all_clones() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let other = clock.clone();

        other.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));

        clock.set(start);
        assert_eq!(other.now(), start);
    }

    #[test]
    fn system_clock_is_past_2020() {
        let now = SystemClock.now();
        assert!(now > Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    }
}
