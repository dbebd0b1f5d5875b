//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{AlarmFilter, AlarmStore, StorageError, check_transition};
use crate::core::alarm::{Alarm, AlarmState};
use crate::core::types::AlarmId;

/// In-memory storage backend.
///
/// State transitions are checked and applied under the write lock.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    alarms: RwLock<HashMap<AlarmId, Alarm>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            alarms: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_by_due_date(alarms: &mut [Alarm]) {
    alarms.sort_by(|a, b| {
        a.due_date
            .cmp(&b.due_date)
            .then(a.created_at.cmp(&b.created_at))
    });
}

#[async_trait]
impl AlarmStore for InMemoryStorage {
    async fn create(&self, alarm: Alarm) -> Result<Alarm, StorageError> {
        let mut alarms = self.alarms.write().map_err(|_| StorageError::LockPoisoned)?;
        if alarms.contains_key(&alarm.id) {
            return Err(StorageError::DuplicateKey(format!("alarm: {}", alarm.id)));
        }
        alarms.insert(alarm.id, alarm.clone());
        Ok(alarm)
    }

    async fn remove(&self, filter: &AlarmFilter) -> Result<usize, StorageError> {
        filter.require_event_path()?;
        let mut alarms = self.alarms.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = alarms.len();
        alarms.retain(|_, alarm| !filter.matches(alarm));
        Ok(before - alarms.len())
    }

    async fn set_state(&self, alarm: &Alarm, state: AlarmState) -> Result<Alarm, StorageError> {
        check_transition(alarm.state, state)?;

        let mut alarms = self.alarms.write().map_err(|_| StorageError::LockPoisoned)?;
        let stored = alarms
            .get_mut(&alarm.id)
            .ok_or_else(|| StorageError::NotFound(format!("alarm: {}", alarm.id)))?;

        if stored.state != alarm.state {
            return Err(StorageError::TransitionFailed {
                id: alarm.id,
                expected: alarm.state,
                actual: stored.state,
            });
        }

        stored.state = state;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn get_alarms_to_handle(&self, now: DateTime<Utc>) -> Result<Vec<Alarm>, StorageError> {
        let alarms = self.alarms.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut due: Vec<_> = alarms.values().filter(|a| a.is_due(now)).cloned().collect();
        sort_by_due_date(&mut due);
        Ok(due)
    }

    async fn get(&self, id: &AlarmId) -> Result<Alarm, StorageError> {
        let alarms = self.alarms.read().map_err(|_| StorageError::LockPoisoned)?;
        alarms
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("alarm: {}", id)))
    }

    async fn list(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>, StorageError> {
        let alarms = self.alarms.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = alarms.values().filter(|a| filter.matches(a)).cloned().collect();
        sort_by_due_date(&mut result);
        Ok(result)
    }
}
