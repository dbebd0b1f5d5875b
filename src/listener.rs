//! Turns calendar change notifications into alarm records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::core::alarm::{Alarm, AlarmState};
use crate::core::event::{AlarmDefinition, AlarmDefinitionError, CalendarEvent};
use crate::core::ical::{IcalError, Trigger};
use crate::core::recurrence::{RRuleEngine, RecurrenceEngine};
use crate::core::types::EventPath;
use crate::events::{EventNotification, NotificationHandler, Topic};
use crate::storage::{AlarmFilter, AlarmStore, StorageError};

/// Errors raised while handling a change notification.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The notification is missing required data.
    #[error("validation error: {0}")]
    Validation(String),

    /// The payload is not a usable VCALENDAR.
    #[error("invalid event payload: {0}")]
    InvalidPayload(#[from] IcalError),

    /// One VALARM could not be turned into an alarm.
    #[error("malformed alarm definition: {0}")]
    AlarmDefinition(#[from] AlarmDefinitionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Outcome of each alarm definition, in VALARM order.
pub type AlarmOutcomes = Vec<Result<Alarm, ListenerError>>;

/// Keeps the alarm store in sync with calendar changes.
pub struct EventChangeListener<S: AlarmStore> {
    store: Arc<S>,
    engine: RRuleEngine,
}

impl<S: AlarmStore> EventChangeListener<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            engine: RRuleEngine::new(),
        }
    }

    /// Create one alarm per VALARM of the event.
    ///
    /// Each definition is parsed and stored on its own; a failure is
    /// reported in its slot of the result and never prevents its siblings.
    pub async fn on_created(
        &self,
        event_path: &EventPath,
        payload: &str,
    ) -> Result<AlarmOutcomes, ListenerError> {
        validate(event_path, Some(payload))?;
        let event = CalendarEvent::parse(event_path.clone(), payload)?;
        let now = Utc::now();

        let mut outcomes = Vec::with_capacity(event.alarm_count());
        for definition in event.alarm_definitions() {
            let outcome = match definition.and_then(|d| self.alarm_for(&event, &d, now)) {
                Ok(alarm) => self.store.create(alarm).await.map_err(ListenerError::from),
                Err(e) => Err(ListenerError::from(e)),
            };

            match &outcome {
                Ok(alarm) => tracing::debug!(
                    alarm_id = %alarm.id,
                    event_path = %event_path,
                    action = %alarm.action,
                    due_date = %alarm.due_date,
                    "Alarm registered"
                ),
                Err(e) => tracing::warn!(
                    event_path = %event_path,
                    error = %e,
                    "Could not register alarm"
                ),
            }
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Replace the WAITING alarms of an event with ones derived from the new
    /// payload. Fired alarms are left alone.
    pub async fn on_updated(
        &self,
        event_path: &EventPath,
        payload: &str,
    ) -> Result<AlarmOutcomes, ListenerError> {
        validate(event_path, Some(payload))?;

        let filter = AlarmFilter::for_event(event_path.clone()).with_state(AlarmState::Waiting);
        let removed = self.store.remove(&filter).await?;
        tracing::debug!(event_path = %event_path, removed, "Removed waiting alarms");

        self.on_created(event_path, payload).await
    }

    /// Remove every alarm of an event, whatever its state.
    pub async fn on_deleted(&self, event_path: &EventPath) -> Result<usize, ListenerError> {
        validate(event_path, None)?;

        let removed = self
            .store
            .remove(&AlarmFilter::for_event(event_path.clone()))
            .await?;
        tracing::debug!(event_path = %event_path, removed, "Removed alarms");
        Ok(removed)
    }

    fn alarm_for(
        &self,
        event: &CalendarEvent,
        definition: &AlarmDefinition,
        now: DateTime<Utc>,
    ) -> Result<Alarm, AlarmDefinitionError> {
        let mut alarm = Alarm::new(
            event.path.clone(),
            event.uid.clone(),
            definition.action,
            self.due_date(event, definition, now)?,
            event.source(),
        )
        .with_alarm_index(definition.index);
        alarm.recipient = definition.recipient.clone();
        alarm.summary = event.summary.clone();
        Ok(alarm)
    }

    /// Fire time of the first occurrence whose trigger is still ahead of
    /// `now`. Falls back to the first occurrence when the series has no
    /// upcoming one or cannot be expanded.
    fn due_date(
        &self,
        event: &CalendarEvent,
        definition: &AlarmDefinition,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, AlarmDefinitionError> {
        let out_of_range = || AlarmDefinitionError::OutOfRange(definition.index);
        let first = definition
            .trigger
            .fire_time(event.start)
            .ok_or_else(out_of_range)?;

        let Trigger::Relative(offset) = definition.trigger else {
            return Ok(first);
        };
        if first > now || !event.is_recurring() {
            return Ok(first);
        }

        let window_start = now.checked_sub_signed(offset).ok_or_else(out_of_range)?;
        match self.engine.next_occurrence(event, window_start) {
            Ok(Some(start)) => start.checked_add_signed(offset).ok_or_else(out_of_range),
            Ok(None) => Ok(first),
            Err(e) => {
                tracing::warn!(
                    event_path = %event.path,
                    trigger = %definition.trigger,
                    error = %e,
                    "Could not expand recurrence, using first occurrence"
                );
                Ok(first)
            }
        }
    }
}

fn validate(event_path: &EventPath, payload: Option<&str>) -> Result<(), ListenerError> {
    if event_path.is_empty() {
        return Err(ListenerError::Validation("event path is required".to_string()));
    }
    if payload.is_some_and(|p| p.trim().is_empty()) {
        return Err(ListenerError::Validation("event payload is required".to_string()));
    }
    Ok(())
}

fn log_outcomes(topic: Topic, event_path: &EventPath, result: Result<AlarmOutcomes, ListenerError>) {
    match result {
        Ok(outcomes) => {
            let failed = outcomes.iter().filter(|o| o.is_err()).count();
            tracing::info!(
                topic = %topic,
                event_path = %event_path,
                created = outcomes.len() - failed,
                failed,
                "Alarms synchronized"
            );
        }
        Err(e) => tracing::error!(
            topic = %topic,
            event_path = %event_path,
            error = %e,
            "Failed to handle notification"
        ),
    }
}

#[async_trait]
impl<S: AlarmStore> NotificationHandler for EventChangeListener<S> {
    async fn handle(&self, topic: Topic, notification: &EventNotification) {
        let path = &notification.event_path;
        match topic {
            Topic::EventCreated => {
                log_outcomes(topic, path, self.on_created(path, &notification.event).await)
            }
            Topic::EventUpdated => {
                log_outcomes(topic, path, self.on_updated(path, &notification.event).await)
            }
            Topic::EventDeleted => match self.on_deleted(path).await {
                Ok(removed) => {
                    tracing::info!(topic = %topic, event_path = %path, removed, "Alarms removed")
                }
                Err(e) => tracing::error!(
                    topic = %topic,
                    event_path = %path,
                    error = %e,
                    "Failed to handle notification"
                ),
            },
        }
    }
}
