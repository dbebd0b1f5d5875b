//! Registers the next alarm of a recurring event after one fires.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::core::alarm::Alarm;
use crate::core::event::{AlarmDefinitionError, CalendarEvent};
use crate::core::ical::{IcalError, Trigger, format_duration};
use crate::core::recurrence::{RRuleEngine, RecurrenceEngine, RecurrenceError};
use crate::storage::{AlarmStore, StorageError};

/// Default margin added to the window start, in seconds.
pub const DEFAULT_LOOKAHEAD_SECS: i64 = 60;

/// Errors that can occur while re-arming an alarm.
#[derive(Debug, Error)]
pub enum RearmError {
    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] IcalError),

    #[error("originating alarm: {0}")]
    Definition(#[from] AlarmDefinitionError),

    #[error(transparent)]
    Recurrence(#[from] RecurrenceError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Computes and stores the successor of a fired alarm.
pub struct Rearmer<S: AlarmStore> {
    store: Arc<S>,
    engine: RRuleEngine,
    lookahead: Duration,
}

impl<S: AlarmStore> Rearmer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            engine: RRuleEngine::new(),
            lookahead: Duration::seconds(DEFAULT_LOOKAHEAD_SECS),
        }
    }

    /// Set the margin that keeps an occurrence whose trigger already fired
    /// from being selected again.
    pub fn with_lookahead(mut self, lookahead: Duration) -> Self {
        self.lookahead = lookahead;
        self
    }

    /// Due date of the alarm's next occurrence, if the event recurs.
    ///
    /// The search window opens at the start of the occurrence whose trigger
    /// fires at `now`, plus the lookahead.
    pub fn next_due_date(
        &self,
        alarm: &Alarm,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, RearmError> {
        let event = CalendarEvent::parse(alarm.event_path.clone(), &alarm.snapshot)?;
        if !event.is_recurring() {
            return Ok(None);
        }

        let offset = match event.alarm_definition(alarm.alarm_index)?.trigger {
            Trigger::Relative(offset) => offset,
            Trigger::Absolute(_) => return Ok(None),
        };

        let out_of_range = || AlarmDefinitionError::OutOfRange(alarm.alarm_index);
        let window_start = now
            .checked_sub_signed(offset)
            .and_then(|t| t.checked_add_signed(self.lookahead))
            .ok_or_else(out_of_range)?;
        let Some(start) = self.engine.next_occurrence(&event, window_start)? else {
            return Ok(None);
        };
        tracing::debug!(
            alarm_id = %alarm.id,
            offset = %format_duration(offset),
            occurrence = %start,
            "Next occurrence found"
        );
        Ok(Some(start.checked_add_signed(offset).ok_or_else(out_of_range)?))
    }

    /// Store the successor of `alarm` as a new WAITING alarm.
    ///
    /// Returns `None` when the event does not recur, the trigger is absolute
    /// or the recurrence set is exhausted.
    pub async fn register_next(
        &self,
        alarm: &Alarm,
        now: DateTime<Utc>,
    ) -> Result<Option<Alarm>, RearmError> {
        let Some(due_date) = self.next_due_date(alarm, now)? else {
            tracing::debug!(alarm_id = %alarm.id, event_path = %alarm.event_path, "No next occurrence");
            return Ok(None);
        };

        let next = self.store.create(alarm.successor(due_date)).await?;
        tracing::info!(
            alarm_id = %alarm.id,
            next_alarm_id = %next.id,
            event_path = %alarm.event_path,
            due_date = %next.due_date,
            "Registered next alarm"
        );
        Ok(Some(next))
    }
}
