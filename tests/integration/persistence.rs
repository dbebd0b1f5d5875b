//! Alarms survive a restart when stored in SQLite.
#![cfg(feature = "sqlite")]

use crate::common::{jan, wait_for_state};
use reveil::testing::{IcsBuilder, RecordingHandler, RecordingQueue};
use reveil::{
    AlarmAction, AlarmFilter, AlarmScheduler, AlarmState, AlarmStore, EventChangeListener,
    EventPath, HandlerRegistry, SqliteStorage,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_alarms_are_rearmed_after_restart() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("alarms.db");
    let path = EventPath::new("/cal/daily.ics");

    // First process: register the event and stop.
    {
        let store = Arc::new(SqliteStorage::new(&db).await.unwrap());
        let ics = IcsBuilder::new("daily", "20300101T100000Z")
            .rrule("FREQ=DAILY;COUNT=2")
            .alarm("DISPLAY", "-PT10M")
            .build();
        let outcomes = EventChangeListener::new(store.clone())
            .on_created(&path, &ics)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        store.close().await;
    }

    // Second process: the stored alarm fires and is re-armed from its snapshot.
    let store = Arc::new(SqliteStorage::new(&db).await.unwrap());
    let registry = Arc::new(HandlerRegistry::new());
    registry
        .register(RecordingHandler::new("popup", &[AlarmAction::Display]))
        .await
        .unwrap();
    let scheduler = AlarmScheduler::new(store.clone(), registry, Arc::new(RecordingQueue::new()));

    let fired = store
        .list(&AlarmFilter::for_event(path.clone()))
        .await
        .unwrap()
        .remove(0);
    let report = scheduler.tick_at(jan(1, 9, 50)).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.rearmed, 1);

    wait_for_state(&*store, &fired.id, AlarmState::Done, Duration::from_secs(1)).await;
    let waiting = store
        .list(&AlarmFilter::for_event(path).with_state(AlarmState::Waiting))
        .await
        .unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].due_date, jan(2, 9, 50));
    assert_eq!(waiting[0].snapshot, fired.snapshot);

    store.close().await;
}
