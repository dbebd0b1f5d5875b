//! Dispatch through the local job queue to registered handlers.

use crate::common::{jan, wait_for_deliveries};
use reveil::testing::{FailingHandler, IcsBuilder, RecordingHandler};
use reveil::{
    AlarmAction, AlarmFilter, AlarmHandler, AlarmScheduler, AlarmState, AlarmStore,
    EventChangeListener, EventPath, HandlerRegistry, InMemoryStorage, JobQueue, LocalJobQueue,
    RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

async fn register(
    registry: &HandlerRegistry,
    queue: &LocalJobQueue,
    handler: Arc<dyn AlarmHandler>,
) {
    registry.register(handler.clone()).await.unwrap();
    queue.create_worker(handler).await.unwrap();
}

#[tokio::test]
async fn test_each_alarm_reaches_only_matching_handler() {
    let store = Arc::new(InMemoryStorage::new());
    let registry = Arc::new(HandlerRegistry::new());
    let queue = Arc::new(LocalJobQueue::new());
    let mail = RecordingHandler::new("mail", &[AlarmAction::Email]);
    let popup = RecordingHandler::new("popup", &[AlarmAction::Display]);
    register(&registry, &queue, mail.clone()).await;
    register(&registry, &queue, popup.clone()).await;

    let path = EventPath::new("/cal/review.ics");
    let ics = IcsBuilder::new("review", "20300101T100000Z")
        .alarm_to("EMAIL", "-PT1H", "ann@example.com")
        .alarm("DISPLAY", "-PT5M")
        .build();
    EventChangeListener::new(store.clone())
        .on_created(&path, &ics)
        .await
        .unwrap();

    let scheduler = AlarmScheduler::new(store.clone(), registry, queue.clone());
    let report = scheduler.tick_at(jan(1, 10, 0)).await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.jobs_submitted, 2);

    wait_for_deliveries(&mail, 1, Duration::from_secs(2)).await;
    wait_for_deliveries(&popup, 1, Duration::from_secs(2)).await;
    queue.shutdown(Duration::from_secs(2)).await.unwrap();

    let mailed = mail.delivered().await;
    assert_eq!(mailed.len(), 1);
    assert_eq!(mailed[0].action, AlarmAction::Email);
    assert_eq!(mailed[0].recipient.as_deref(), Some("ann@example.com"));

    let shown = popup.delivered().await;
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].action, AlarmAction::Display);

    let done = store
        .list(&AlarmFilter::for_event(path).with_state(AlarmState::Done))
        .await
        .unwrap();
    assert_eq!(done.len(), 2);
}

#[tokio::test]
async fn test_two_handlers_for_one_action_each_get_a_job() {
    let store = Arc::new(InMemoryStorage::new());
    let registry = Arc::new(HandlerRegistry::new());
    let queue = Arc::new(LocalJobQueue::new());
    let first = RecordingHandler::new("first", &[AlarmAction::Display]);
    let second = RecordingHandler::new("second", &[AlarmAction::Display]);
    register(&registry, &queue, first.clone()).await;
    register(&registry, &queue, second.clone()).await;

    let ics = IcsBuilder::new("a", "20300101T100000Z")
        .alarm("DISPLAY", "PT0S")
        .build();
    EventChangeListener::new(store.clone())
        .on_created(&EventPath::new("/a.ics"), &ics)
        .await
        .unwrap();

    let scheduler = AlarmScheduler::new(store, registry, queue.clone());
    let report = scheduler.tick_at(jan(1, 10, 0)).await.unwrap();
    assert_eq!(report.jobs_submitted, 2);

    queue.shutdown(Duration::from_secs(2)).await.unwrap();
    assert_eq!(first.delivery_count().await, 1);
    assert_eq!(second.delivery_count().await, 1);
}

#[tokio::test]
async fn test_transient_handler_failure_is_retried_by_queue() {
    let store = Arc::new(InMemoryStorage::new());
    let registry = Arc::new(HandlerRegistry::new());
    let queue = Arc::new(
        LocalJobQueue::new().with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(10))),
    );
    let flaky = Arc::new(FailingHandler::new("flaky", AlarmAction::Display, 2));
    register(&registry, &queue, flaky.clone()).await;

    let ics = IcsBuilder::new("a", "20300101T100000Z")
        .alarm("DISPLAY", "PT0S")
        .build();
    EventChangeListener::new(store.clone())
        .on_created(&EventPath::new("/a.ics"), &ics)
        .await
        .unwrap();

    let scheduler = AlarmScheduler::new(store, registry, queue.clone());
    scheduler.tick_at(jan(1, 10, 0)).await.unwrap();

    queue.shutdown(Duration::from_secs(2)).await.unwrap();
    assert_eq!(flaky.call_count().await, 3);
    assert_eq!(queue.stats().delivered(), 1);
    assert_eq!(queue.stats().retried(), 2);
}
