//! In-process job queue: one bounded channel and one worker task per handler.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

use super::{Job, JobAck, JobQueue, QueueError};
use crate::core::alarm::Alarm;
use crate::core::retry::RetryPolicy;
use crate::handlers::{AlarmHandler, DeliveryOutcome};

/// Default channel capacity per handler.
pub const DEFAULT_BUFFER: usize = 128;

/// Delivery counters shared with the workers.
#[derive(Debug, Default)]
pub struct QueueStats {
    delivered: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl QueueStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Jobs the handler accepted but had nothing to deliver for.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Jobs given up on after exhausting retries.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }
}

/// [`JobQueue`] backed by tokio channels.
pub struct LocalJobQueue {
    buffer: usize,
    retry: RetryPolicy,
    senders: RwLock<HashMap<String, mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<QueueStats>,
}

impl LocalJobQueue {
    pub fn new() -> Self {
        Self {
            buffer: DEFAULT_BUFFER,
            retry: RetryPolicy::default(),
            senders: RwLock::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Set the per-handler channel capacity.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Set the retry policy applied to failed deliveries.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for LocalJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Deliver one job, retrying per `retry`.
async fn deliver_with_retry(
    handler: &dyn AlarmHandler,
    job: &Job,
    retry: &RetryPolicy,
    stats: &QueueStats,
) {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match handler.deliver(&job.alarm).await {
            Ok(outcome) => {
                tracing::debug!(
                    job_id = %job.id,
                    alarm_id = %job.alarm.id,
                    handler = %job.handler,
                    attempts,
                    ?outcome,
                    "Job delivered"
                );
                let counter = match outcome {
                    DeliveryOutcome::Delivered => &stats.delivered,
                    DeliveryOutcome::Skipped(_) => &stats.skipped,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) if retry.should_retry(attempts, e.is_transient()) => {
                tracing::warn!(
                    job_id = %job.id,
                    alarm_id = %job.alarm.id,
                    handler = %job.handler,
                    attempts,
                    error = %e,
                    "Delivery failed, retrying"
                );
                stats.retried.fetch_add(1, Ordering::Relaxed);
                sleep(retry.delay).await;
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    alarm_id = %job.alarm.id,
                    event_path = %job.alarm.event_path,
                    handler = %job.handler,
                    attempts,
                    error = %e,
                    "Delivery failed, giving up"
                );
                stats.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }
}

#[async_trait]
impl JobQueue for LocalJobQueue {
    async fn create_worker(&self, handler: Arc<dyn AlarmHandler>) -> Result<(), QueueError> {
        let mut senders = self.senders.write().await;
        let name = handler.name().to_string();
        if senders.contains_key(&name) {
            return Err(QueueError::WorkerExists(name));
        }

        let (tx, mut rx) = mpsc::channel::<Job>(self.buffer);
        let retry = self.retry.clone();
        let stats = Arc::clone(&self.stats);

        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                deliver_with_retry(&*handler, &job, &retry, &stats).await;
            }
            tracing::debug!(handler = %handler.name(), "Worker stopped");
        });

        senders.insert(name, tx);
        self.workers.lock().await.push(worker);
        Ok(())
    }

    async fn enqueue(&self, alarm: &Alarm, handler: &dyn AlarmHandler) -> Result<JobAck, QueueError> {
        let sender = self
            .senders
            .read()
            .await
            .get(handler.name())
            .cloned()
            .ok_or_else(|| QueueError::NoWorker(handler.name().to_string()))?;

        let job = Job::new(alarm.clone(), handler.name());
        let ack = JobAck {
            job_id: job.id,
            handler: job.handler.clone(),
        };
        sender.send(job).await.map_err(|_| QueueError::Closed)?;
        Ok(ack)
    }

    async fn shutdown(&self, timeout: Duration) -> Result<(), QueueError> {
        // Dropping the senders closes the channels once they are empty.
        self.senders.write().await.clear();

        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        if workers.is_empty() {
            return Ok(());
        }
        tracing::info!(workers = workers.len(), "Draining job queue workers");

        let deadline = Instant::now() + timeout;
        let mut remaining = 0;
        for worker in workers {
            let left = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(left, worker).await.is_err() {
                remaining += 1;
            }
        }

        if remaining > 0 {
            tracing::warn!(remaining, ?timeout, "Job queue shutdown timed out");
            return Err(QueueError::ShutdownTimeout(remaining));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alarm::AlarmAction;
    use crate::core::retry::RetryCondition;
    use crate::core::types::EventPath;
    use crate::handlers::{DeliveryOutcome, HandlerError, LogHandler};
    use chrono::Utc;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `fail_times` deliveries with the given error.
    struct Flaky {
        fail_times: u32,
        error: HandlerError,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(fail_times: u32, error: HandlerError) -> Arc<Self> {
            Arc::new(Self {
                fail_times,
                error,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl AlarmHandler for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn actions(&self) -> &[AlarmAction] {
            &[AlarmAction::Email]
        }

        async fn deliver(&self, _alarm: &Alarm) -> Result<DeliveryOutcome, HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_times {
                Err(self.error.clone())
            } else {
                Ok(DeliveryOutcome::Delivered)
            }
        }
    }

    fn alarm() -> Alarm {
        Alarm::new(EventPath::new("/a.ics"), "uid", AlarmAction::Email, Utc::now(), "")
    }

    #[tokio::test]
    async fn test_enqueue_without_worker_fails() {
        let queue = LocalJobQueue::new();
        let handler = Flaky::new(0, HandlerError::Transient("x".into()));

        let result = queue.enqueue(&alarm(), &*handler).await;
        assert_eq!(result, Err(QueueError::NoWorker("flaky".to_string())));
    }

    #[tokio::test]
    async fn test_duplicate_worker_is_rejected() {
        let queue = LocalJobQueue::new();
        let handler = Flaky::new(0, HandlerError::Transient("x".into()));

        queue.create_worker(handler.clone()).await.unwrap();
        let result = queue.create_worker(handler).await;

        assert_eq!(result, Err(QueueError::WorkerExists("flaky".to_string())));
        queue.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_enqueued_jobs_are_delivered_before_shutdown_returns() {
        let queue = LocalJobQueue::new();
        let handler = Flaky::new(0, HandlerError::Transient("x".into()));
        queue.create_worker(handler.clone()).await.unwrap();

        for _ in 0..5 {
            let ack = queue.enqueue(&alarm(), &*handler).await.unwrap();
            assert_eq!(ack.handler, "flaky");
        }
        queue.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
        assert_eq!(queue.stats().delivered(), 5);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let queue = LocalJobQueue::new().with_retry_policy(
            RetryPolicy::fixed(3, Duration::from_millis(1))
                .with_condition(RetryCondition::TransientOnly),
        );
        let handler = Flaky::new(2, HandlerError::Transient("421".into()));
        queue.create_worker(handler.clone()).await.unwrap();

        queue.enqueue(&alarm(), &*handler).await.unwrap();
        queue.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let stats = queue.stats();
        assert_eq!(stats.retried(), 2);
        assert_eq!(stats.delivered(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried_when_transient_only() {
        let queue = LocalJobQueue::new().with_retry_policy(
            RetryPolicy::fixed(3, Duration::from_millis(1))
                .with_condition(RetryCondition::TransientOnly),
        );
        let handler = Flaky::new(10, HandlerError::Permanent("550".into()));
        queue.create_worker(handler.clone()).await.unwrap();

        queue.enqueue(&alarm(), &*handler).await.unwrap();
        queue.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().failed(), 1);
    }

    #[tokio::test]
    async fn test_skipped_deliveries_are_counted_apart() {
        let queue = LocalJobQueue::new();
        let handler = Arc::new(LogHandler::new());
        queue.create_worker(handler.clone()).await.unwrap();

        let mut titled = alarm();
        titled.action = AlarmAction::Display;
        titled.summary = Some("Standup".to_string());
        let mut untitled = titled.clone();
        untitled.summary = None;

        queue.enqueue(&titled, &*handler).await.unwrap();
        queue.enqueue(&untitled, &*handler).await.unwrap();
        queue.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(queue.stats().delivered(), 1);
        assert_eq!(queue.stats().skipped(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let queue = LocalJobQueue::new();
        let handler = Flaky::new(0, HandlerError::Transient("x".into()));
        queue.create_worker(handler.clone()).await.unwrap();
        queue.shutdown(Duration::from_secs(1)).await.unwrap();

        let result = queue.enqueue(&alarm(), &*handler).await;
        assert!(matches!(result, Err(QueueError::NoWorker(_))));
    }
}
