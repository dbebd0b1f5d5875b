//! Alarm persistence.
//!
//! The [`AlarmStore`] trait is the contract the listener, scheduler and
//! re-armer rely on. Two backends ship with the crate: [`InMemoryStorage`]
//! and, behind the `sqlite` feature, [`SqliteStorage`].

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::core::alarm::{Alarm, AlarmState};
use crate::core::types::{AlarmId, EventPath};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested alarm was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An alarm with the same id already exists.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Compare-and-set lost: the stored state is not the one the caller observed.
    #[error("transition of alarm {id} failed: expected {expected}, found {actual}")]
    TransitionFailed {
        id: AlarmId,
        expected: AlarmState,
        actual: AlarmState,
    },

    /// The requested transition is not allowed by the alarm state machine.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: AlarmState, to: AlarmState },

    /// The filter is not acceptable for the operation.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// A stored row could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Selects alarms by event path and, optionally, state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmFilter {
    pub event_path: Option<EventPath>,
    pub state: Option<AlarmState>,
}

impl AlarmFilter {
    /// Matches every alarm. Only valid for [`AlarmStore::list`].
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches every alarm of one calendar object.
    pub fn for_event(path: EventPath) -> Self {
        Self {
            event_path: Some(path),
            state: None,
        }
    }

    pub fn with_state(mut self, state: AlarmState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn matches(&self, alarm: &Alarm) -> bool {
        self.event_path
            .as_ref()
            .is_none_or(|path| &alarm.event_path == path)
            && self.state.is_none_or(|state| alarm.state == state)
    }

    /// The event path, required for destructive operations.
    pub fn require_event_path(&self) -> Result<&EventPath, StorageError> {
        match &self.event_path {
            Some(path) if !path.is_empty() => Ok(path),
            _ => Err(StorageError::InvalidFilter(
                "removal requires an event path".to_string(),
            )),
        }
    }
}

/// Checks a requested transition against the state machine.
pub(crate) fn check_transition(from: AlarmState, to: AlarmState) -> Result<(), StorageError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StorageError::InvalidTransition { from, to })
    }
}

/// Durable alarm store.
#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Persist a new alarm.
    async fn create(&self, alarm: Alarm) -> Result<Alarm, StorageError>;

    /// Remove alarms matching `filter`; returns how many were removed.
    ///
    /// The filter must carry an event path.
    async fn remove(&self, filter: &AlarmFilter) -> Result<usize, StorageError>;

    /// Atomically move `alarm` from its observed state to `state`.
    ///
    /// Fails with [`StorageError::TransitionFailed`] when the stored state no
    /// longer equals `alarm.state`, so concurrent callers attempting the same
    /// transition cannot both succeed.
    async fn set_state(&self, alarm: &Alarm, state: AlarmState) -> Result<Alarm, StorageError>;

    /// WAITING alarms due at or before `now`, earliest first.
    async fn get_alarms_to_handle(&self, now: DateTime<Utc>) -> Result<Vec<Alarm>, StorageError>;

    /// Fetch one alarm.
    async fn get(&self, id: &AlarmId) -> Result<Alarm, StorageError>;

    /// Alarms matching `filter`, ordered by due date.
    async fn list(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>, StorageError>;
}

#[async_trait]
impl<S: AlarmStore + ?Sized> AlarmStore for Arc<S> {
    async fn create(&self, alarm: Alarm) -> Result<Alarm, StorageError> {
        (**self).create(alarm).await
    }

    async fn remove(&self, filter: &AlarmFilter) -> Result<usize, StorageError> {
        (**self).remove(filter).await
    }

    async fn set_state(&self, alarm: &Alarm, state: AlarmState) -> Result<Alarm, StorageError> {
        (**self).set_state(alarm, state).await
    }

    async fn get_alarms_to_handle(&self, now: DateTime<Utc>) -> Result<Vec<Alarm>, StorageError> {
        (**self).get_alarms_to_handle(now).await
    }

    async fn get(&self, id: &AlarmId) -> Result<Alarm, StorageError> {
        (**self).get(id).await
    }

    async fn list(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>, StorageError> {
        (**self).list(filter).await
    }
}
