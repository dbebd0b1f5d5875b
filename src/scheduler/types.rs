//! Scheduler type definitions.
//!
//! This module contains error types, state enums, reports and command types
//! for the scan/dispatch loop.

use crate::core::alarm::AlarmState;
use crate::core::types::AlarmId;
use crate::storage::StorageError;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Fetching due alarms failed; the tick's batch was abandoned.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused; periodic ticks are skipped.
    Paused,
}

/// What happened to one due alarm during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmOutcome {
    /// Another actor claimed the alarm first.
    Skipped { alarm_id: AlarmId },

    /// The claim itself failed for a reason other than contention.
    ClaimFailed { alarm_id: AlarmId, error: String },

    /// The alarm was claimed and dispatched.
    Processed {
        alarm_id: AlarmId,
        /// State the alarm was left in.
        state: AlarmState,
        /// Handlers that matched the alarm's action.
        handlers: usize,
        /// Submissions acknowledged by the queue.
        submitted: usize,
        /// Submissions the queue rejected.
        failed: usize,
        /// Successor registered by the re-armer.
        next: Option<AlarmId>,
        /// Re-arm or final-state error, if any.
        error: Option<String>,
    },
}

/// Summary of one scan tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Due alarms returned by the store.
    pub fetched: usize,
    /// Alarms this tick moved to RUNNING.
    pub claimed: usize,
    /// Alarms lost to a concurrent claim.
    pub skipped: usize,
    pub jobs_submitted: usize,
    pub jobs_failed: usize,
    /// Successor alarms registered.
    pub rearmed: usize,
    /// Alarms with no matching handler.
    pub unhandled: usize,
    /// Claim, re-arm and bookkeeping failures.
    pub errors: usize,
    pub outcomes: Vec<AlarmOutcome>,
}

impl TickReport {
    pub(crate) fn record(&mut self, outcome: AlarmOutcome) {
        match &outcome {
            AlarmOutcome::Skipped { .. } => self.skipped += 1,
            AlarmOutcome::ClaimFailed { .. } => self.errors += 1,
            AlarmOutcome::Processed {
                state,
                submitted,
                failed,
                next,
                error,
                ..
            } => {
                self.claimed += 1;
                self.jobs_submitted += submitted;
                self.jobs_failed += failed;
                if next.is_some() {
                    self.rearmed += 1;
                }
                if *state == AlarmState::Unhandled {
                    self.unhandled += 1;
                }
                if error.is_some() {
                    self.errors += 1;
                }
            }
        }
        self.outcomes.push(outcome);
    }
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Run a tick immediately.
    TickNow {
        response: oneshot::Sender<Result<TickReport, SchedulerError>>,
    },
    /// Pause the scheduler.
    Pause { response: oneshot::Sender<()> },
    /// Resume the scheduler.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the scheduler.
    Shutdown { response: oneshot::Sender<()> },
}
