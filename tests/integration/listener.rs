//! Change notifications published on the bus keep the alarm store in sync.

use crate::common::jan;
use reveil::testing::{IcsBuilder, RecordingHandler, RecordingQueue};
use reveil::{
    AlarmAction, AlarmFilter, AlarmService, AlarmState, AlarmStore, EventNotification,
    EventPath, InMemoryStorage, SchedulerState, Topic,
};
use std::sync::Arc;
use std::time::Duration;

fn three_alarms() -> String {
    IcsBuilder::new("planning", "20300101T100000Z")
        .summary("Planning")
        .alarm("DISPLAY", "-PT1H")
        .alarm("DISPLAY", "-PT30M")
        .alarm("AUDIO", "-PT5M")
        .build()
}

fn service() -> AlarmService<InMemoryStorage> {
    AlarmService::new(
        Arc::new(InMemoryStorage::new()),
        Arc::new(RecordingQueue::new()),
    )
    .with_tick_interval(Duration::from_secs(3600))
    .with_handler(RecordingHandler::new("popup", &[AlarmAction::Display]))
}

#[tokio::test]
async fn test_deleted_removes_alarms_in_every_state() {
    let service = service();
    let handle = service.init().await.unwrap();
    let store = service.store();
    let bus = service.bus();
    let path = EventPath::new("/cal/planning.ics");

    bus.publish(
        Topic::EventCreated,
        EventNotification::new(path.clone(), three_alarms()),
    )
    .await;

    // Earliest alarm DONE, latest RUNNING, the middle one still WAITING.
    let scheduler = handle.scheduler();
    let mut alarms = store.list(&AlarmFilter::for_event(path.clone())).await.unwrap();
    alarms.sort_by_key(|a| a.due_date);
    assert_eq!(alarms.len(), 3);
    assert_eq!(alarms[0].due_date, jan(1, 9, 0));
    store.set_state(&alarms[0], AlarmState::Running).await.unwrap();
    let running = store.get(&alarms[0].id).await.unwrap();
    store.set_state(&running, AlarmState::Done).await.unwrap();
    store.set_state(&alarms[2], AlarmState::Running).await.unwrap();

    let states: Vec<AlarmState> = store
        .list(&AlarmFilter::for_event(path.clone()))
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.state)
        .collect();
    assert!(states.contains(&AlarmState::Done));
    assert!(states.contains(&AlarmState::Running));
    assert!(states.contains(&AlarmState::Waiting));

    bus.publish(Topic::EventDeleted, EventNotification::deleted(path.clone()))
        .await;

    assert!(store.list(&AlarmFilter::for_event(path)).await.unwrap().is_empty());
    assert_eq!(scheduler.state().await, SchedulerState::Running);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_updated_is_idempotent() {
    let service = service();
    let handle = service.init().await.unwrap();
    let store = service.store();
    let bus = service.bus();
    let path = EventPath::new("/cal/planning.ics");

    bus.publish(
        Topic::EventCreated,
        EventNotification::new(path.clone(), three_alarms()),
    )
    .await;
    for _ in 0..2 {
        bus.publish(
            Topic::EventUpdated,
            EventNotification::new(path.clone(), three_alarms()),
        )
        .await;
    }

    let alarms = store
        .list(&AlarmFilter::for_event(path).with_state(AlarmState::Waiting))
        .await
        .unwrap();
    assert_eq!(alarms.len(), 3);
    assert!(alarms.iter().all(|a| a.summary.as_deref() == Some("Planning")));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_definition_does_not_block_siblings() {
    let service = service();
    let handle = service.init().await.unwrap();
    let path = EventPath::new("/cal/mixed.ics");
    let ics = IcsBuilder::new("mixed", "20300101T100000Z")
        .alarm("DISPLAY", "-PT10M")
        .alarm("PROCEDURE", "-PT5M")
        .alarm("EMAIL", "-PT1M")
        .build();

    service
        .bus()
        .publish(Topic::EventCreated, EventNotification::new(path.clone(), ics))
        .await;

    let alarms = service
        .store()
        .list(&AlarmFilter::for_event(path))
        .await
        .unwrap();
    assert_eq!(alarms.len(), 2);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_end_to_end_tick_after_notification() {
    let service = service();
    let handle = service.init().await.unwrap();
    let path = EventPath::new("/cal/planning.ics");
    service
        .bus()
        .publish(
            Topic::EventCreated,
            EventNotification::new(path.clone(), three_alarms()),
        )
        .await;

    // All three alarms are in 2030; a manual tick now finds nothing due.
    let report = handle.scheduler().tick_now().await.unwrap();
    assert_eq!(report.fetched, 0);
    handle.shutdown().await.unwrap();
}
