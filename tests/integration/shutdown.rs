//! Graceful shutdown integration tests.
//!
//! Tests that verify the service stops its scan loop and then waits for
//! accepted deliveries before returning.

use async_trait::async_trait;
use reveil::testing::IcsBuilder;
use reveil::{
    Alarm, AlarmAction, AlarmHandler, AlarmService, DeliveryOutcome, EventChangeListener,
    EventPath, HandlerError, InMemoryStorage, LocalJobQueue, QueueError, SchedulerState,
    ServiceError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Handler that takes a specified duration to deliver.
struct SlowHandler {
    duration: Duration,
    started: AtomicBool,
    completed: AtomicBool,
}

impl SlowHandler {
    fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            started: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        })
    }

    fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn was_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlarmHandler for SlowHandler {
    fn name(&self) -> &str {
        "slow"
    }

    fn actions(&self) -> &[AlarmAction] {
        &[AlarmAction::Display]
    }

    async fn deliver(&self, _alarm: &Alarm) -> Result<DeliveryOutcome, HandlerError> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.completed.store(true, Ordering::SeqCst);
        Ok(DeliveryOutcome::Delivered)
    }
}

fn service(handler: Arc<SlowHandler>, shutdown_timeout: Duration) -> AlarmService<InMemoryStorage> {
    AlarmService::new(
        Arc::new(InMemoryStorage::new()),
        Arc::new(LocalJobQueue::new()),
    )
    .with_tick_interval(Duration::from_secs(3600))
    .with_shutdown_timeout(shutdown_timeout)
    .with_handler(handler)
}

/// Register an event whose DISPLAY alarm is already due.
///
/// The scan loop ticks as soon as the service starts, so the alarm is picked
/// up without a manual tick.
async fn register_due_event(service: &AlarmService<InMemoryStorage>) {
    let ics = IcsBuilder::new("past", "20200101T100000Z")
        .alarm("DISPLAY", "PT0S")
        .build();
    EventChangeListener::new(service.store())
        .on_created(&EventPath::new("/cal/past.ics"), &ics)
        .await
        .unwrap();
}

async fn wait_until_started(handler: &SlowHandler) {
    let start = tokio::time::Instant::now();
    while !handler.was_started() {
        if start.elapsed() > Duration::from_secs(2) {
            panic!("Timeout waiting for delivery to start");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Test: Graceful shutdown waits for an accepted delivery to finish.
#[tokio::test]
async fn test_graceful_shutdown_waits_for_deliveries() {
    let handler = SlowHandler::new(Duration::from_millis(300));
    let service = service(handler.clone(), Duration::from_secs(5));
    register_due_event(&service).await;
    let handle = service.init().await.unwrap();

    wait_until_started(&handler).await;
    assert!(!handler.was_completed(), "Delivery should not have completed yet");

    let shutdown_start = std::time::Instant::now();
    handle.shutdown().await.unwrap();
    let shutdown_duration = shutdown_start.elapsed();

    assert!(handler.was_completed(), "Delivery should complete before shutdown returns");
    assert!(
        shutdown_duration >= Duration::from_millis(100),
        "Shutdown should have waited for the delivery, took {:?}",
        shutdown_duration
    );
}

/// Test: Shutdown reports deliveries still running at the deadline.
#[tokio::test]
async fn test_graceful_shutdown_timeout_exceeded() {
    let handler = SlowHandler::new(Duration::from_secs(5));
    let service = service(handler.clone(), Duration::from_millis(100));
    register_due_event(&service).await;
    let handle = service.init().await.unwrap();
    wait_until_started(&handler).await;

    let result = handle.shutdown().await;
    assert!(matches!(
        result,
        Err(ServiceError::Queue(QueueError::ShutdownTimeout(1)))
    ));
    assert!(!handler.was_completed());
}

/// Test: Shutdown with nothing in flight returns immediately.
#[tokio::test]
async fn test_graceful_shutdown_with_no_pending_deliveries() {
    let handler = SlowHandler::new(Duration::from_millis(300));
    let service = service(handler.clone(), Duration::from_secs(5));
    let handle = service.init().await.unwrap();

    let shutdown_start = std::time::Instant::now();
    handle.shutdown().await.unwrap();

    assert!(shutdown_start.elapsed() < Duration::from_secs(1));
    assert!(!handler.was_started());
}

/// Test: The scan loop refuses commands once stopped.
#[tokio::test]
async fn test_scheduler_rejects_ticks_after_shutdown() {
    let handler = SlowHandler::new(Duration::from_millis(10));
    let service = service(handler, Duration::from_secs(1));
    let handle = service.init().await.unwrap();
    let scheduler = handle.scheduler().clone();

    handle.shutdown().await.unwrap();

    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
    assert!(scheduler.tick_now().await.is_err());
}
