use criterion::{black_box, criterion_group, criterion_main, Criterion};
use campusmail::{
    limiter::bucket::TokenBucket, LimiterConfig, LimiterRegistry, ManualClock, SendGate, SendKind,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn bucket_try_take(c: &mut Criterion) {
    c.bench_function("bucket_try_take_denied", |b| {
        let mut bucket = TokenBucket::full(Duration::from_secs(6 * 3600), 0);
        let _ = bucket.try_take(0);
        let mut now = 0u64;
        b.iter(|| {
            now += 1;
            black_box(bucket.try_take(black_box(now)))
        });
    });
}

fn gate_admit_distinct_identities(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry =
        Arc::new(LimiterRegistry::new(LimiterConfig::default(), Arc::new(ManualClock::starting_now())));
    let gate = SendGate::new(registry.clone());
    let counter = AtomicUsize::new(0);

    c.bench_function("gate_admit_new_identity", |b| {
        b.to_async(&rt).iter(|| async {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            let identity = format!("user{n}@princeton.edu");
            let _ = black_box(gate.admit(&identity, SendKind::Normal).await);
        });
    });

    // Rejection path: one identity, bucket already drained.
    let _ = rt.block_on(gate.admit("busy@princeton.edu", SendKind::Normal));
    c.bench_function("gate_admit_rejected", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = black_box(gate.admit(black_box("busy@princeton.edu"), SendKind::Normal).await);
        });
    });

    let removed = registry.sweep();
    black_box(removed);
}

criterion_group!(benches, bucket_try_take, gate_admit_distinct_identities);
criterion_main!(benches);
