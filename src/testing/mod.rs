//! Testing utilities for users of the reveil library.
//!
//! This module provides helpers for testing alarm dispatch:
//!
//! - [`RecordingHandler`]: A handler that records every alarm it delivers
//! - [`FailingHandler`]: A handler that fails N times then succeeds
//! - [`RecordingQueue`]: A job queue that records submissions instead of delivering
//! - [`FailingQueue`]: A job queue that rejects submissions for chosen handlers
//! - [`FailingStore`]: An in-memory store that fails chosen operations
//! - [`IcsBuilder`]: Builds VCALENDAR payloads for events with alarms

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::core::alarm::{Alarm, AlarmAction, AlarmState};
use crate::core::types::AlarmId;
use crate::handlers::{AlarmHandler, DeliveryOutcome, HandlerError};
use crate::queue::{Job, JobAck, JobQueue, QueueError};
use crate::storage::{AlarmFilter, AlarmStore, InMemoryStorage, StorageError};

/// A handler that records every alarm it is asked to deliver.
///
/// # Example
///
/// ```
/// use reveil::core::alarm::AlarmAction;
/// use reveil::testing::RecordingHandler;
///
/// let handler = RecordingHandler::new("mail", &[AlarmAction::Email]);
/// // Register it, run a tick, then inspect `handler.delivered().await`.
/// ```
pub struct RecordingHandler {
    name: String,
    actions: Vec<AlarmAction>,
    delivered: Mutex<Vec<Alarm>>,
}

impl RecordingHandler {
    pub fn new(name: impl Into<String>, actions: &[AlarmAction]) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            actions: actions.to_vec(),
            delivered: Mutex::new(Vec::new()),
        })
    }

    /// Alarms delivered so far, in delivery order.
    pub async fn delivered(&self) -> Vec<Alarm> {
        self.delivered.lock().await.clone()
    }

    pub async fn delivery_count(&self) -> usize {
        self.delivered.lock().await.len()
    }
}

#[async_trait]
impl AlarmHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn actions(&self) -> &[AlarmAction] {
        &self.actions
    }

    async fn deliver(&self, alarm: &Alarm) -> Result<DeliveryOutcome, HandlerError> {
        self.delivered.lock().await.push(alarm.clone());
        Ok(DeliveryOutcome::Delivered)
    }
}

/// A handler that fails a configurable number of times before succeeding.
///
/// Useful for testing queue retry logic. Failure counting is protected by a
/// mutex so concurrent deliveries stay deterministic.
///
/// ```
/// use reveil::core::alarm::AlarmAction;
/// use reveil::testing::FailingHandler;
///
/// // Fails twice with a transient error, then delivers.
/// let handler = FailingHandler::new("flaky", AlarmAction::Display, 2);
/// ```
pub struct FailingHandler {
    name: String,
    actions: Vec<AlarmAction>,
    state: Mutex<FailingHandlerState>,
    error: HandlerError,
}

struct FailingHandlerState {
    failures_remaining: u32,
    call_count: u32,
}

impl FailingHandler {
    /// Fail `fail_count` times with a transient error, then succeed.
    pub fn new(name: impl Into<String>, action: AlarmAction, fail_count: u32) -> Self {
        Self::with_error(
            name,
            action,
            fail_count,
            HandlerError::Transient("intentional test failure".to_string()),
        )
    }

    /// Fail `fail_count` times with `error`, then succeed.
    pub fn with_error(
        name: impl Into<String>,
        action: AlarmAction,
        fail_count: u32,
        error: HandlerError,
    ) -> Self {
        Self {
            name: name.into(),
            actions: vec![action],
            state: Mutex::new(FailingHandlerState {
                failures_remaining: fail_count,
                call_count: 0,
            }),
            error,
        }
    }

    /// Number of delivery attempts so far.
    pub async fn call_count(&self) -> u32 {
        self.state.lock().await.call_count
    }
}

#[async_trait]
impl AlarmHandler for FailingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn actions(&self) -> &[AlarmAction] {
        &self.actions
    }

    async fn deliver(&self, _alarm: &Alarm) -> Result<DeliveryOutcome, HandlerError> {
        let mut state = self.state.lock().await;
        state.call_count += 1;
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(self.error.clone());
        }
        Ok(DeliveryOutcome::Delivered)
    }
}

/// A job queue that records submissions without delivering them.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<Job>>,
    workers: Mutex<Vec<String>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submitted (alarm, handler name) pairs, in submission order.
    pub async fn jobs(&self) -> Vec<(AlarmId, String)> {
        self.jobs
            .lock()
            .await
            .iter()
            .map(|job| (job.alarm.id, job.handler.clone()))
            .collect()
    }

    /// Handler names bound via [`JobQueue::create_worker`].
    pub async fn workers(&self) -> Vec<String> {
        self.workers.lock().await.clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn create_worker(&self, handler: Arc<dyn AlarmHandler>) -> Result<(), QueueError> {
        let mut workers = self.workers.lock().await;
        if workers.iter().any(|w| w == handler.name()) {
            return Err(QueueError::WorkerExists(handler.name().to_string()));
        }
        workers.push(handler.name().to_string());
        Ok(())
    }

    async fn enqueue(&self, alarm: &Alarm, handler: &dyn AlarmHandler) -> Result<JobAck, QueueError> {
        let job = Job::new(alarm.clone(), handler.name());
        let ack = JobAck {
            job_id: job.id,
            handler: job.handler.clone(),
        };
        self.jobs.lock().await.push(job);
        Ok(ack)
    }
}

/// A job queue that rejects submissions for selected handlers.
pub struct FailingQueue {
    failing: Option<HashSet<String>>,
    inner: RecordingQueue,
}

impl FailingQueue {
    /// Reject submissions for the named handlers; accept the rest.
    pub fn failing_for(handlers: &[&str]) -> Self {
        Self {
            failing: Some(handlers.iter().map(|h| h.to_string()).collect()),
            inner: RecordingQueue::new(),
        }
    }

    /// Reject every submission.
    pub fn failing_all() -> Self {
        Self {
            failing: None,
            inner: RecordingQueue::new(),
        }
    }

    /// Accepted submissions.
    pub async fn jobs(&self) -> Vec<(AlarmId, String)> {
        self.inner.jobs().await
    }

    fn rejects(&self, handler: &str) -> bool {
        self.failing.as_ref().is_none_or(|set| set.contains(handler))
    }
}

#[async_trait]
impl JobQueue for FailingQueue {
    async fn create_worker(&self, handler: Arc<dyn AlarmHandler>) -> Result<(), QueueError> {
        self.inner.create_worker(handler).await
    }

    async fn enqueue(&self, alarm: &Alarm, handler: &dyn AlarmHandler) -> Result<JobAck, QueueError> {
        if self.rejects(handler.name()) {
            return Err(QueueError::Other(format!(
                "intentional submission failure for {}",
                handler.name()
            )));
        }
        self.inner.enqueue(alarm, handler).await
    }
}

/// An [`InMemoryStorage`] that fails selected operations.
///
/// Create calls are counted from 0, whether they succeed or not.
#[derive(Default)]
pub struct FailingStore {
    inner: InMemoryStorage,
    failing_creates: HashSet<usize>,
    create_attempts: AtomicUsize,
    failing_scans: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the create call with this attempt number.
    pub fn failing_create(mut self, attempt: usize) -> Self {
        self.failing_creates.insert(attempt);
        self
    }

    /// Fail the next `count` due-alarm scans.
    pub fn failing_scans(self, count: usize) -> Self {
        self.failing_scans.store(count, Ordering::SeqCst);
        self
    }

    /// Create calls received so far.
    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlarmStore for FailingStore {
    async fn create(&self, alarm: Alarm) -> Result<Alarm, StorageError> {
        let attempt = self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing_creates.contains(&attempt) {
            return Err(StorageError::Other(format!(
                "intentional failure of create #{}",
                attempt
            )));
        }
        self.inner.create(alarm).await
    }

    async fn remove(&self, filter: &AlarmFilter) -> Result<usize, StorageError> {
        self.inner.remove(filter).await
    }

    async fn set_state(&self, alarm: &Alarm, state: AlarmState) -> Result<Alarm, StorageError> {
        self.inner.set_state(alarm, state).await
    }

    async fn get_alarms_to_handle(&self, now: DateTime<Utc>) -> Result<Vec<Alarm>, StorageError> {
        let should_fail = self
            .failing_scans
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StorageError::Other("intentional scan failure".to_string()));
        }
        self.inner.get_alarms_to_handle(now).await
    }

    async fn get(&self, id: &AlarmId) -> Result<Alarm, StorageError> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>, StorageError> {
        self.inner.list(filter).await
    }
}

/// Builds a VCALENDAR with one master VEVENT.
///
/// Date-time arguments use iCalendar basic format (`20300101T100000Z`, or
/// local time when a TZID is set).
///
/// ```
/// use reveil::testing::IcsBuilder;
///
/// let ics = IcsBuilder::new("standup", "20300101T100000Z")
///     .rrule("FREQ=DAILY;COUNT=3")
///     .alarm("DISPLAY", "-PT15M")
///     .build();
/// assert!(ics.contains("RRULE:FREQ=DAILY;COUNT=3"));
/// ```
#[derive(Debug, Clone)]
pub struct IcsBuilder {
    uid: String,
    start: String,
    tzid: Option<String>,
    summary: Option<String>,
    rrules: Vec<String>,
    exdates: Vec<String>,
    rdates: Vec<String>,
    alarms: Vec<String>,
    overrides: Vec<String>,
}

impl IcsBuilder {
    pub fn new(uid: impl Into<String>, start: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            start: start.into(),
            tzid: None,
            summary: None,
            rrules: Vec::new(),
            exdates: Vec::new(),
            rdates: Vec::new(),
            alarms: Vec::new(),
            overrides: Vec::new(),
        }
    }

    /// Interpret DTSTART, EXDATE, RDATE and RECURRENCE-ID values in `tzid`.
    pub fn tzid(mut self, tzid: impl Into<String>) -> Self {
        self.tzid = Some(tzid.into());
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn rrule(mut self, rule: impl Into<String>) -> Self {
        self.rrules.push(rule.into());
        self
    }

    pub fn exdate(mut self, value: impl Into<String>) -> Self {
        self.exdates.push(value.into());
        self
    }

    pub fn rdate(mut self, value: impl Into<String>) -> Self {
        self.rdates.push(value.into());
        self
    }

    /// Add a VALARM with a relative (`-PT15M`) or absolute
    /// (`VALUE=DATE-TIME:20300101T080000Z`) trigger.
    pub fn alarm(self, action: &str, trigger: &str) -> Self {
        self.push_alarm(action, trigger, None)
    }

    /// Add a VALARM addressed to `attendee`.
    pub fn alarm_to(self, action: &str, trigger: &str, attendee: &str) -> Self {
        self.push_alarm(action, trigger, Some(attendee))
    }

    fn push_alarm(mut self, action: &str, trigger: &str, attendee: Option<&str>) -> Self {
        let trigger = match trigger.strip_prefix("VALUE=") {
            Some(_) => format!("TRIGGER;{}", trigger),
            None => format!("TRIGGER:{}", trigger),
        };
        let mut lines = vec![
            "BEGIN:VALARM".to_string(),
            format!("ACTION:{}", action),
            trigger,
        ];
        if let Some(attendee) = attendee {
            lines.push(format!("ATTENDEE:mailto:{}", attendee));
        }
        lines.push("END:VALARM".to_string());
        self.alarms.push(lines.join("\n"));
        self
    }

    /// Move the instance identified by `recurrence_id` to `start`.
    pub fn moved(mut self, recurrence_id: &str, start: &str) -> Self {
        let instance = self.instance(recurrence_id, &format!("{}:{}", self.dt_name("DTSTART"), start));
        self.overrides.push(instance);
        self
    }

    /// Cancel the instance identified by `recurrence_id`.
    pub fn cancelled(mut self, recurrence_id: &str) -> Self {
        let instance = self.instance(recurrence_id, "STATUS:CANCELLED");
        self.overrides.push(instance);
        self
    }

    fn instance(&self, recurrence_id: &str, body: &str) -> String {
        format!(
            "BEGIN:VEVENT\nUID:{}\n{}:{}\n{}\nEND:VEVENT",
            self.uid,
            self.dt_name("RECURRENCE-ID"),
            recurrence_id,
            body
        )
    }

    fn dt_name(&self, name: &str) -> String {
        match &self.tzid {
            Some(tzid) => format!("{};TZID={}", name, tzid),
            None => name.to_string(),
        }
    }

    pub fn build(&self) -> String {
        let mut lines = vec![
            "BEGIN:VCALENDAR".to_string(),
            "VERSION:2.0".to_string(),
            "PRODID:-//reveil//tests//EN".to_string(),
            "BEGIN:VEVENT".to_string(),
            format!("UID:{}", self.uid),
            format!("{}:{}", self.dt_name("DTSTART"), self.start),
        ];
        if let Some(summary) = &self.summary {
            lines.push(format!("SUMMARY:{}", summary));
        }
        for rule in &self.rrules {
            lines.push(format!("RRULE:{}", rule));
        }
        for value in &self.exdates {
            lines.push(format!("{}:{}", self.dt_name("EXDATE"), value));
        }
        for value in &self.rdates {
            lines.push(format!("{}:{}", self.dt_name("RDATE"), value));
        }
        lines.extend(self.alarms.iter().cloned());
        lines.push("END:VEVENT".to_string());
        lines.extend(self.overrides.iter().cloned());
        lines.push("END:VCALENDAR".to_string());
        let mut ics = lines.join("\n");
        ics.push('\n');
        ics.replace('\n', "\r\n")
    }
}
