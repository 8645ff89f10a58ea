#![allow(missing_docs)]

mod common;

use campusmail::telemetry::{LimiterEvent, MemorySink};
use campusmail::{
    Clock, DeliveryError, EventEmitter, LimiterConfig, LimiterRegistry, MailError, MailEvent,
    ManualClock, SendGate, SendKind,
};
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(60 * 60);

fn gate() -> (SendGate, ManualClock) {
    let clock = ManualClock::starting_now();
    let registry = Arc::new(LimiterRegistry::new(LimiterConfig::default(), Arc::new(clock.clone())));
    (SendGate::new(registry), clock)
}

#[tokio::test]
async fn normal_send_window_is_six_hours() {
    let (gate, clock) = gate();
    let id = "a@princeton.edu";

    assert!(gate.admit(id, SendKind::Normal).await.is_ok());

    clock.advance(HOUR);
    let err = gate.admit(id, SendKind::Normal).await.unwrap_err();
    assert!(err.is_rate_limited());
    let wait = err.retry_after().unwrap();
    let ms = Duration::from_millis(1);
    assert!(wait >= 5 * HOUR - ms && wait <= 5 * HOUR + ms);

    clock.advance(5 * HOUR + Duration::from_secs(1));
    assert!(gate.admit(id, SendKind::Normal).await.is_ok());
}

#[tokio::test]
async fn test_send_window_is_one_minute() {
    let (gate, clock) = gate();
    let id = "a@princeton.edu";

    assert!(gate.admit(id, SendKind::Test).await.is_ok());
    clock.advance(Duration::from_secs(59));
    assert!(gate.admit(id, SendKind::Test).await.unwrap_err().is_rate_limited());
    clock.advance(Duration::from_secs(1));
    assert!(gate.admit(id, SendKind::Test).await.is_ok());

    // The normal bucket is untouched by test sends.
    assert!(gate.admit(id, SendKind::Normal).await.is_ok());
}

#[tokio::test]
async fn failed_delivery_is_refunded_and_retry_admitted() {
    let (gate, _clock) = gate();
    let id = "a@princeton.edu";

    let result = gate
        .execute(id, SendKind::Normal, || async {
            Err::<(), _>(MailError::from(DeliveryError::Transport("connection reset".into())))
        })
        .await;
    assert!(result.unwrap_err().is_infrastructure());

    let retry = gate.execute(id, SendKind::Normal, || async { Ok::<_, MailError>(()) }).await;
    assert!(retry.is_ok());
}

#[tokio::test]
async fn refund_resets_both_buckets() {
    let (gate, _clock) = gate();
    let id = "a@princeton.edu";

    gate.admit(id, SendKind::Test).await.unwrap();
    assert!(gate.admit(id, SendKind::Test).await.is_err());

    let failed = gate
        .execute(id, SendKind::Normal, || async {
            Err::<(), _>(MailError::validation("bad schedule"))
        })
        .await;
    assert!(failed.is_err());

    // Eviction dropped the drained test bucket along with the normal one.
    assert!(gate.admit(id, SendKind::Test).await.is_ok());
}

#[tokio::test]
async fn identities_are_independent() {
    let (gate, _clock) = gate();
    gate.admit("a@princeton.edu", SendKind::Normal).await.unwrap();
    assert!(gate.admit("b@princeton.edu", SendKind::Normal).await.is_ok());
}

#[tokio::test]
async fn concurrent_acquire_creates_one_entry() {
    let clock = ManualClock::starting_now();
    let registry = Arc::new(LimiterRegistry::new(LimiterConfig::default(), Arc::new(clock)));

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.acquire("new@princeton.edu") })
        })
        .collect();
    let mut entries = Vec::new();
    for task in tasks {
        entries.push(task.await.unwrap());
    }

    assert_eq!(registry.len(), 1);
    assert!(entries.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_normal_sends_admit_exactly_one() {
    let (gate, _clock) = gate();
    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.admit("a@princeton.edu", SendKind::Normal).await })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refunds_racing_admissions_never_double_admit() {
    use campusmail::BucketKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let clock = ManualClock::starting_now();
    let registry = Arc::new(LimiterRegistry::new(LimiterConfig::default(), Arc::new(clock)));
    let admitted = Arc::new(AtomicUsize::new(0));
    let evicted = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let registry = registry.clone();
        let admitted = admitted.clone();
        let evicted = evicted.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            for _ in 0..500 {
                if worker % 4 == 0 {
                    if registry.evict("a@princeton.edu") {
                        evicted.fetch_add(1, Ordering::SeqCst);
                    }
                } else if registry.consume("a@princeton.edu", BucketKind::Normal).is_allowed() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Each admission after the first needs a fresh entry, which needs an eviction.
    let admitted = admitted.load(Ordering::SeqCst);
    let evicted = evicted.load(Ordering::SeqCst);
    assert!(admitted >= 1);
    assert!(admitted <= evicted + 1, "admitted {admitted} with only {evicted} evictions");
}

#[tokio::test]
async fn sweep_keeps_recently_seen_entries() {
    let clock = ManualClock::starting_now();
    let registry = Arc::new(LimiterRegistry::new(LimiterConfig::default(), Arc::new(clock.clone())));

    registry.acquire("old@princeton.edu");
    clock.advance(3 * HOUR);
    registry.acquire("recent@princeton.edu");

    clock.advance(3 * HOUR + Duration::from_millis(1));
    assert_eq!(registry.sweep(), 1);
    assert!(!registry.contains("old@princeton.edu"));
    assert!(registry.contains("recent@princeton.edu"));

    let seen = registry.last_seen_millis("recent@princeton.edu").unwrap();
    assert!(clock.now_millis() - seen <= registry.config().normal_period().as_millis() as u64);
}

#[tokio::test]
async fn admissions_and_rejections_are_observable() {
    let clock = ManualClock::starting_now();
    let sink = MemorySink::new();
    let registry = Arc::new(
        LimiterRegistry::new(LimiterConfig::default(), Arc::new(clock))
            .with_events(EventEmitter::new(sink.clone())),
    );
    let gate = SendGate::new(registry);

    gate.admit("a@princeton.edu", SendKind::Normal).await.unwrap();
    let _ = gate.admit("a@princeton.edu", SendKind::Normal).await;

    let events = sink.events();
    assert!(matches!(events[0], MailEvent::Limiter(LimiterEvent::Admitted { .. })));
    assert!(matches!(events[1], MailEvent::Limiter(LimiterEvent::Rejected { .. })));
}

#[tokio::test]
async fn bypass_never_touches_the_registry() {
    let (gate, _clock) = gate();
    let gate = gate.with_bypass(true);
    for _ in 0..3 {
        assert!(gate.admit("test@princeton.edu", SendKind::Normal).await.is_ok());
    }
    assert!(gate.registry().is_empty());
}
