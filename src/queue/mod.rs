//! Job dispatch: submitting (alarm, handler) work units for delivery.
//!
//! An acknowledgment from [`JobQueue::enqueue`] means the job was accepted,
//! not that it was delivered. Delivery, retries and giving up belong to the
//! queue's workers.

mod local;

pub use local::{DEFAULT_BUFFER, LocalJobQueue, QueueStats};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::alarm::Alarm;
use crate::core::types::JobId;
use crate::handlers::AlarmHandler;

/// Errors that can occur when submitting jobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// No worker consumes jobs for this handler.
    #[error("no worker for handler: {0}")]
    NoWorker(String),

    /// A worker for this handler already exists.
    #[error("worker already exists for handler: {0}")]
    WorkerExists(String),

    /// The queue no longer accepts jobs.
    #[error("queue is closed")]
    Closed,

    /// Workers did not drain before the shutdown deadline.
    #[error("shutdown timed out with {0} worker(s) still running")]
    ShutdownTimeout(usize),

    /// Backend-specific failure.
    #[error("queue error: {0}")]
    Other(String),
}

/// One alarm to be delivered by one handler.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub alarm: Alarm,
    /// Name of the handler that will deliver the alarm.
    pub handler: String,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(alarm: Alarm, handler: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            alarm,
            handler: handler.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Submission acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobAck {
    pub job_id: JobId,
    pub handler: String,
}

/// Queue that hands alarms to handler workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Bind `handler` to queue consumption so its jobs get delivered.
    async fn create_worker(&self, handler: Arc<dyn AlarmHandler>) -> Result<(), QueueError>;

    /// Submit one alarm for delivery by `handler`.
    async fn enqueue(&self, alarm: &Alarm, handler: &dyn AlarmHandler) -> Result<JobAck, QueueError>;

    /// Stop accepting jobs and wait up to `timeout` for accepted ones to be
    /// delivered.
    async fn shutdown(&self, _timeout: Duration) -> Result<(), QueueError> {
        Ok(())
    }
}
