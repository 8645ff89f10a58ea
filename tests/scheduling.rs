#![allow(missing_docs)]

mod common;

use campusmail::schedule::{is_schedule_valid, validate_schedule, SCHEDULE_MARGIN};
use campusmail::store::MailStore;
use campusmail::{Clock, InMemoryMailStore, ManualClock, ScheduleCoordinator, StoreError};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use common::draft;
use std::sync::Arc;

fn coordinator() -> (ScheduleCoordinator, ManualClock, Arc<InMemoryMailStore>) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2030, 3, 4, 15, 0, 0).unwrap());
    let store = Arc::new(InMemoryMailStore::new());
    let coordinator = ScheduleCoordinator::new(store.clone(), Arc::new(clock.clone()));
    (coordinator, clock, store)
}

#[test]
fn margin_is_exclusive() {
    let now = Utc.with_ymd_and_hms(2030, 3, 4, 15, 0, 0).unwrap();
    let at = |secs: i64| (now + ChronoDuration::seconds(secs)).to_rfc3339();

    assert!(!is_schedule_valid(&at(0), now, SCHEDULE_MARGIN));
    assert!(!is_schedule_valid(&at(60), now, SCHEDULE_MARGIN));
    assert!(is_schedule_valid(&at(61), now, SCHEDULE_MARGIN));
    assert!(validate_schedule("next tuesday", now, SCHEDULE_MARGIN).unwrap_err().is_validation());
}

#[tokio::test]
async fn duplicate_time_conflicts_until_cancelled() {
    let (coordinator, clock, store) = coordinator();
    let at = (clock.now() + ChronoDuration::hours(2)).to_rfc3339();

    coordinator.schedule(draft("a@princeton.edu", "Open mic", &at)).await.unwrap();

    let err = coordinator.schedule(draft("a@princeton.edu", "Open mic v2", &at)).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(store.scheduled_len(), 1);

    // Another identity may use the same slot.
    coordinator.schedule(draft("b@princeton.edu", "Chess night", &at)).await.unwrap();

    coordinator.cancel("a@princeton.edu", &at).await.unwrap();
    coordinator.schedule(draft("a@princeton.edu", "Open mic v2", &at)).await.unwrap();
    assert_eq!(store.scheduled_len(), 2);
}

#[tokio::test]
async fn equal_instants_in_other_offsets_are_duplicates() {
    let (coordinator, _clock, _store) = coordinator();
    coordinator
        .schedule(draft("a@princeton.edu", "Open mic", "2030-03-05T17:00:00Z"))
        .await
        .unwrap();
    let err = coordinator
        .schedule(draft("a@princeton.edu", "Open mic", "2030-03-05T12:00:00-05:00"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn listing_is_per_identity_and_ascending() {
    let (coordinator, clock, _store) = coordinator();
    for hours in [5, 2, 9] {
        let at = (clock.now() + ChronoDuration::hours(hours)).to_rfc3339();
        coordinator.schedule(draft("a@princeton.edu", "Event", &at)).await.unwrap();
    }
    let at = (clock.now() + ChronoDuration::hours(1)).to_rfc3339();
    coordinator.schedule(draft("b@princeton.edu", "Other", &at)).await.unwrap();

    let listed = coordinator.list_scheduled("a@princeton.edu").await.unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.windows(2).all(|pair| pair[0].send_at < pair[1].send_at));
    assert!(listed.iter().all(|m| m.send_at.offset().local_minus_utc() == -5 * 3600));
}

#[tokio::test]
async fn concurrent_same_time_inserts_land_once() {
    let (coordinator, clock, store) = coordinator();
    let at = (clock.now() + ChronoDuration::hours(3)).to_rfc3339();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let coordinator = coordinator.clone();
            let at = at.clone();
            tokio::spawn(async move {
                coordinator.schedule(draft("a@princeton.edu", &format!("take {i}"), &at)).await
            })
        })
        .collect();

    let mut stored = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => stored += 1,
            Err(err) => assert!(err.is_conflict()),
        }
    }
    assert_eq!(stored, 1);
    assert_eq!(store.scheduled_len(), 1);
}

#[tokio::test]
async fn store_rejects_duplicate_inserts_directly() {
    let (coordinator, clock, store) = coordinator();
    let at = (clock.now() + ChronoDuration::hours(2)).to_rfc3339();
    let message = coordinator.schedule(draft("a@princeton.edu", "Open mic", &at)).await.unwrap();

    let mut copy = message.clone();
    copy.id = uuid::Uuid::new_v4();
    let err = store.insert_scheduled(copy).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { .. }));
}
