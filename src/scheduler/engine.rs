//! Scan/dispatch engine.
//!
//! Each tick:
//! - Fetches WAITING alarms due at or before now, earliest first
//! - Claims each one (WAITING -> RUNNING); lost claims are skipped
//! - Submits one job per matching handler, tolerating per-handler failure
//! - Re-arms recurring alarms, then records the final state
//!
//! Ticks run inline in the scheduler task, so two ticks never overlap.
//! Alarm pipelines inside a tick run concurrently up to a fixed limit.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::handle::SchedulerHandle;
use super::types::{AlarmOutcome, SchedulerCommand, SchedulerError, SchedulerState, TickReport};
use crate::core::alarm::{Alarm, AlarmState};
use crate::handlers::{AlarmHandler, HandlerRegistry};
use crate::queue::{JobAck, JobQueue, QueueError};
use crate::rearm::Rearmer;
use crate::storage::{AlarmStore, StorageError};

/// Default interval between scan ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on concurrently processed alarms within a tick.
pub const DEFAULT_MAX_CONCURRENT_ALARMS: usize = 8;

/// Submit `alarm` to every handler independently.
///
/// Returns one result per handler, in handler order; a rejected submission
/// never prevents the others.
pub async fn dispatch_all(
    queue: &dyn JobQueue,
    alarm: &Alarm,
    handlers: &[Arc<dyn AlarmHandler>],
) -> Vec<Result<JobAck, QueueError>> {
    let mut results = Vec::with_capacity(handlers.len());
    for handler in handlers {
        let result = queue.enqueue(alarm, &**handler).await;
        if let Err(e) = &result {
            tracing::warn!(
                alarm_id = %alarm.id,
                event_path = %alarm.event_path,
                handler = %handler.name(),
                error = %e,
                "Failed to submit alarm job"
            );
        }
        results.push(result);
    }
    results
}

/// The collaborators one alarm pipeline needs.
struct Pipeline<S: AlarmStore> {
    store: Arc<S>,
    registry: Arc<HandlerRegistry>,
    queue: Arc<dyn JobQueue>,
    rearmer: Arc<Rearmer<S>>,
}

impl<S: AlarmStore> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            queue: Arc::clone(&self.queue),
            rearmer: Arc::clone(&self.rearmer),
        }
    }
}

impl<S: AlarmStore> Pipeline<S> {
    async fn process(&self, alarm: Alarm, now: DateTime<Utc>) -> AlarmOutcome {
        let alarm_id = alarm.id;

        let claimed = match self.store.set_state(&alarm, AlarmState::Running).await {
            Ok(claimed) => claimed,
            Err(StorageError::TransitionFailed { .. }) => {
                tracing::debug!(alarm_id = %alarm_id, "Alarm claimed elsewhere, skipping");
                return AlarmOutcome::Skipped { alarm_id };
            }
            Err(e) => {
                tracing::error!(alarm_id = %alarm_id, event_path = %alarm.event_path, error = %e, "Failed to claim alarm");
                return AlarmOutcome::ClaimFailed {
                    alarm_id,
                    error: e.to_string(),
                };
            }
        };

        let handlers = self.registry.handlers_for_action(claimed.action).await;
        let results = dispatch_all(self.queue.as_ref(), &claimed, &handlers).await;
        let submitted = results.iter().filter(|r| r.is_ok()).count();
        let failed = results.len() - submitted;

        let (next, mut error) = match self.rearmer.register_next(&claimed, now).await {
            Ok(next) => (next.map(|a| a.id), None),
            Err(e) => {
                tracing::error!(alarm_id = %alarm_id, event_path = %claimed.event_path, error = %e, "Failed to re-arm alarm");
                (None, Some(e.to_string()))
            }
        };

        let target = if error.is_some() {
            Some(AlarmState::Error)
        } else if handlers.is_empty() {
            tracing::warn!(alarm_id = %alarm_id, action = %claimed.action, "No handler registered for alarm action");
            Some(AlarmState::Unhandled)
        } else if submitted > 0 {
            Some(AlarmState::Done)
        } else {
            tracing::error!(alarm_id = %alarm_id, event_path = %claimed.event_path, failed, "Every submission failed, alarm left RUNNING");
            None
        };

        let mut state = AlarmState::Running;
        if let Some(target) = target {
            match self.store.set_state(&claimed, target).await {
                Ok(updated) => state = updated.state,
                Err(e) => {
                    tracing::error!(alarm_id = %alarm_id, error = %e, "Failed to record alarm state");
                    error.get_or_insert(e.to_string());
                }
            }
        }

        AlarmOutcome::Processed {
            alarm_id,
            state,
            handlers: handlers.len(),
            submitted,
            failed,
            next,
            error,
        }
    }
}

/// Periodically scans the alarm store and dispatches due alarms.
pub struct AlarmScheduler<S: AlarmStore> {
    pipeline: Pipeline<S>,
    tick_interval: Duration,
    max_concurrent_alarms: usize,
}

impl<S: AlarmStore + 'static> AlarmScheduler<S> {
    /// Create a scheduler over `store`, dispatching through `queue` to the
    /// handlers in `registry`.
    pub fn new(store: Arc<S>, registry: Arc<HandlerRegistry>, queue: Arc<dyn JobQueue>) -> Self {
        let rearmer = Arc::new(Rearmer::new(Arc::clone(&store)));
        Self {
            pipeline: Pipeline {
                store,
                registry,
                queue,
                rearmer,
            },
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_concurrent_alarms: DEFAULT_MAX_CONCURRENT_ALARMS,
        }
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set how many alarms a tick processes concurrently.
    pub fn with_max_concurrent_alarms(mut self, max: usize) -> Self {
        self.max_concurrent_alarms = max.max(1);
        self
    }

    /// Use a custom re-armer (recurrence engine, lookahead).
    pub fn with_rearmer(mut self, rearmer: Rearmer<S>) -> Self {
        self.pipeline.rearmer = Arc::new(rearmer);
        self
    }

    /// Run one tick at the current time.
    pub async fn tick(&self) -> Result<TickReport, SchedulerError> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as if the time were `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let due = self.pipeline.store.get_alarms_to_handle(now).await?;
        let mut report = TickReport {
            fetched: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_alarms));
        let mut tasks: Vec<(_, JoinHandle<AlarmOutcome>)> = Vec::with_capacity(due.len());

        for alarm in due {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(error = %e, "Alarm semaphore closed");
                    break;
                }
            };
            let pipeline = self.pipeline.clone();
            let alarm_id = alarm.id;
            let task = tokio::spawn(async move {
                let outcome = pipeline.process(alarm, now).await;
                drop(permit);
                outcome
            });
            tasks.push((alarm_id, task));
        }

        for (alarm_id, task) in tasks {
            match task.await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::error!(alarm_id = %alarm_id, error = %e, "Alarm pipeline panicked");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            fetched = report.fetched,
            claimed = report.claimed,
            skipped = report.skipped,
            jobs_submitted = report.jobs_submitted,
            jobs_failed = report.jobs_failed,
            rearmed = report.rearmed,
            unhandled = report.unhandled,
            errors = report.errors,
            "Tick completed"
        );
        Ok(report)
    }

    /// Start the scan loop and return a handle for controlling it.
    pub fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let state = Arc::new(RwLock::new(SchedulerState::Running));
        let (handle, command_rx) = SchedulerHandle::new(Arc::clone(&state));

        let scheduler_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        (handle, scheduler_task)
    }

    /// Main scheduler loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
    ) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(tick_interval = ?self.tick_interval, "Alarm scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let current_state = *state.read().await;
                    if current_state == SchedulerState::Running
                        && let Err(e) = self.tick().await
                    {
                        tracing::error!(error = %e, "Tick aborted");
                    }
                }

                command = command_rx.recv() => {
                    let Some(command) = command else {
                        // Every handle was dropped.
                        *state.write().await = SchedulerState::Stopped;
                        break;
                    };
                    match command {
                        SchedulerCommand::TickNow { response } => {
                            let _ = response.send(self.tick().await);
                        }
                        SchedulerCommand::Pause { response } => {
                            *state.write().await = SchedulerState::Paused;
                            tracing::info!("Scheduler paused");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Resume { response } => {
                            *state.write().await = SchedulerState::Running;
                            tracing::info!("Scheduler resumed");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Shutdown { response } => {
                            *state.write().await = SchedulerState::Stopped;
                            tracing::info!("Scheduler stopped");
                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }
}
