//! The persisted alarm record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::types::{AlarmId, EventPath};

/// Delivery action declared by a VALARM `ACTION` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmAction {
    Email,
    Display,
    Audio,
}

/// An `ACTION` value outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported alarm action: {0}")]
pub struct UnknownAction(pub String);

impl AlarmAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmAction::Email => "EMAIL",
            AlarmAction::Display => "DISPLAY",
            AlarmAction::Audio => "AUDIO",
        }
    }
}

impl FromStr for AlarmAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EMAIL" => Ok(AlarmAction::Email),
            "DISPLAY" => Ok(AlarmAction::Display),
            "AUDIO" => Ok(AlarmAction::Audio),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}

impl fmt::Display for AlarmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an alarm.
///
/// ```text
/// WAITING -> RUNNING -> DONE | ERROR | UNHANDLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmState {
    /// Persisted and waiting for its due date.
    Waiting,
    /// Claimed by a scan tick; dispatch in progress.
    Running,
    /// Dispatched and re-armed.
    Done,
    /// Re-arming failed.
    Error,
    /// No handler was registered for the alarm's action.
    Unhandled,
}

/// A state string outside the known set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown alarm state: {0}")]
pub struct UnknownState(pub String);

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Waiting => "WAITING",
            AlarmState::Running => "RUNNING",
            AlarmState::Done => "DONE",
            AlarmState::Error => "ERROR",
            AlarmState::Unhandled => "UNHANDLED",
        }
    }

    /// Whether the store may move an alarm from `self` to `next`.
    pub fn can_transition_to(&self, next: AlarmState) -> bool {
        matches!(
            (self, next),
            (AlarmState::Waiting, AlarmState::Running)
                | (AlarmState::Running, AlarmState::Done)
                | (AlarmState::Running, AlarmState::Error)
                | (AlarmState::Running, AlarmState::Unhandled)
        )
    }
}

impl FromStr for AlarmState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WAITING" => Ok(AlarmState::Waiting),
            "RUNNING" => Ok(AlarmState::Running),
            "DONE" => Ok(AlarmState::Done),
            "ERROR" => Ok(AlarmState::Error),
            "UNHANDLED" => Ok(AlarmState::Unhandled),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable due-time record derived from one VALARM of a calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    /// Path of the calendar object the alarm was derived from.
    pub event_path: EventPath,
    /// UID of the master VEVENT.
    pub event_uid: String,
    pub action: AlarmAction,
    /// Delivery address (ATTENDEE without `mailto:`), when declared.
    pub recipient: Option<String>,
    /// Absolute time at which the alarm fires.
    pub due_date: DateTime<Utc>,
    /// Position of the originating VALARM inside the master VEVENT.
    pub alarm_index: usize,
    /// SUMMARY of the event, kept for handler messages.
    pub summary: Option<String>,
    /// Full VCALENDAR text of the event at creation time.
    pub snapshot: String,
    pub state: AlarmState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alarm {
    /// Create a new WAITING alarm.
    pub fn new(
        event_path: EventPath,
        event_uid: impl Into<String>,
        action: AlarmAction,
        due_date: DateTime<Utc>,
        snapshot: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AlarmId::new(),
            event_path,
            event_uid: event_uid.into(),
            action,
            recipient: None,
            due_date,
            alarm_index: 0,
            summary: None,
            snapshot: snapshot.into(),
            state: AlarmState::Waiting,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_alarm_index(mut self, index: usize) -> Self {
        self.alarm_index = index;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Whether the alarm is WAITING and due at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == AlarmState::Waiting && self.due_date <= now
    }

    /// Copy of this alarm for a later occurrence: fresh identity, new due
    /// date, back to WAITING.
    pub fn successor(&self, due_date: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: AlarmId::new(),
            due_date,
            state: AlarmState::Waiting,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }
}
