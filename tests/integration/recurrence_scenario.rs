//! Recurring event scenarios driven through listener, scheduler and re-armer.

use crate::common::jan;
use chrono::Duration;
use reveil::testing::{IcsBuilder, RecordingHandler, RecordingQueue};
use reveil::{
    AlarmAction, AlarmFilter, AlarmScheduler, AlarmState, AlarmStore, EventChangeListener,
    EventPath, HandlerRegistry, InMemoryStorage,
};
use std::sync::Arc;

struct Fixture {
    store: Arc<InMemoryStorage>,
    queue: Arc<RecordingQueue>,
    listener: EventChangeListener<InMemoryStorage>,
    scheduler: AlarmScheduler<InMemoryStorage>,
}

async fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStorage::new());
    let queue = Arc::new(RecordingQueue::new());
    let registry = Arc::new(HandlerRegistry::new());
    registry
        .register(RecordingHandler::new("mail", &[AlarmAction::Email]))
        .await
        .unwrap();
    let scheduler = AlarmScheduler::new(store.clone(), registry, queue.clone());
    Fixture {
        listener: EventChangeListener::new(store.clone()),
        store,
        queue,
        scheduler,
    }
}

async fn waiting(store: &InMemoryStorage) -> Vec<reveil::Alarm> {
    store
        .list(&AlarmFilter::all().with_state(AlarmState::Waiting))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_daily_three_occurrences_rearm_until_exhausted() {
    let f = fixture().await;
    let path = EventPath::new("/cal/daily.ics");
    let ics = IcsBuilder::new("daily", "20300101T100000Z")
        .rrule("FREQ=DAILY;COUNT=3")
        .alarm_to("EMAIL", "-PT15M", "ann@example.com")
        .build();
    f.listener.on_created(&path, &ics).await.unwrap();

    // Day 1 fires; the successor waits for day 2.
    let report = f.scheduler.tick_at(jan(1, 9, 45)).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.rearmed, 1);
    let next = waiting(&f.store).await;
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].due_date, jan(2, 9, 45));
    assert_eq!(next[0].recipient.as_deref(), Some("ann@example.com"));

    // Day 2 fires; the successor waits for day 3.
    let report = f.scheduler.tick_at(jan(2, 9, 45)).await.unwrap();
    assert_eq!(report.rearmed, 1);
    let next = waiting(&f.store).await;
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].due_date, jan(3, 9, 45));

    // Day 3 is the last occurrence.
    let report = f.scheduler.tick_at(jan(3, 9, 45)).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.rearmed, 0);
    assert!(waiting(&f.store).await.is_empty());

    let done = f
        .store
        .list(&AlarmFilter::for_event(path).with_state(AlarmState::Done))
        .await
        .unwrap();
    assert_eq!(done.len(), 3);
    assert_eq!(f.queue.jobs().await.len(), 3);
}

#[tokio::test]
async fn test_late_tick_skips_to_following_occurrence() {
    let f = fixture().await;
    let path = EventPath::new("/cal/daily.ics");
    let ics = IcsBuilder::new("daily", "20300101T100000Z")
        .rrule("FREQ=DAILY;COUNT=5")
        .alarm("EMAIL", "-PT15M")
        .build();
    f.listener.on_created(&path, &ics).await.unwrap();

    // The service was down for most of day 1; the first occurrence already started.
    f.scheduler.tick_at(jan(1, 10, 30)).await.unwrap();

    let next = waiting(&f.store).await;
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].due_date, jan(2, 9, 45));
}

#[tokio::test]
async fn test_exdate_and_moved_instance_are_respected() {
    let f = fixture().await;
    let path = EventPath::new("/cal/weekly.ics");
    let ics = IcsBuilder::new("weekly", "20300101T100000")
        .tzid("Europe/Paris")
        .rrule("FREQ=DAILY;COUNT=4")
        .exdate("20300102T100000")
        .moved("20300103T100000", "20300103T150000")
        .alarm("EMAIL", "-PT15M")
        .build();
    f.listener.on_created(&path, &ics).await.unwrap();

    // Paris is UTC+1 in January.
    f.scheduler.tick_at(jan(1, 8, 45)).await.unwrap();
    let next = waiting(&f.store).await;
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].due_date, jan(3, 13, 45));

    f.scheduler.tick_at(jan(3, 13, 45)).await.unwrap();
    let next = waiting(&f.store).await;
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].due_date, jan(4, 8, 45));
}

#[tokio::test]
async fn test_update_replaces_waiting_successor() {
    let f = fixture().await;
    let path = EventPath::new("/cal/daily.ics");
    let original = IcsBuilder::new("daily", "20300101T100000Z")
        .rrule("FREQ=DAILY")
        .alarm("EMAIL", "-PT15M")
        .build();
    f.listener.on_created(&path, &original).await.unwrap();
    f.scheduler.tick_at(jan(1, 9, 45)).await.unwrap();

    // Moved to 11:00 from day 2 on; the fired alarm stays.
    let updated = IcsBuilder::new("daily", "20300102T110000Z")
        .rrule("FREQ=DAILY")
        .alarm("EMAIL", "-PT30M")
        .build();
    f.listener.on_updated(&path, &updated).await.unwrap();

    let next = waiting(&f.store).await;
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].due_date, jan(2, 11, 0) - Duration::minutes(30));

    let all = f.store.list(&AlarmFilter::for_event(path)).await.unwrap();
    assert_eq!(all.len(), 2);
}
