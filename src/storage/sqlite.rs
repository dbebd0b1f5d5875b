//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::{AlarmFilter, AlarmStore, StorageError, check_transition};
use crate::core::alarm::{Alarm, AlarmAction, AlarmState};
use crate::core::types::{AlarmId, EventPath};

const SELECT_COLUMNS: &str = "SELECT id, event_path, event_uid, action, recipient, due_date, \
     alarm_index, summary, snapshot, state, created_at, updated_at FROM alarms";

type AlarmRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    i64,
    i64,
    Option<String>,
    String,
    String,
    i64,
    i64,
);

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration. State
/// transitions are conditional updates on `(id, state)`.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn current_state(&self, id: &AlarmId) -> Result<Option<AlarmState>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT state FROM alarms WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        row.map(|(state,)| parse_state(&state)).transpose()
    }
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Serialization(format!("timestamp out of range: {}", millis)))
}

fn parse_state(s: &str) -> Result<AlarmState, StorageError> {
    s.parse::<AlarmState>()
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

fn row_to_alarm(row: AlarmRow) -> Result<Alarm, StorageError> {
    let id = Uuid::parse_str(&row.0).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let action = row
        .3
        .parse::<AlarmAction>()
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let alarm_index =
        usize::try_from(row.6).map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(Alarm {
        id: AlarmId::from_uuid(id),
        event_path: EventPath::new(row.1),
        event_uid: row.2,
        action,
        recipient: row.4,
        due_date: from_millis(row.5)?,
        alarm_index,
        summary: row.7,
        snapshot: row.8,
        state: parse_state(&row.9)?,
        created_at: from_millis(row.10)?,
        updated_at: from_millis(row.11)?,
    })
}

#[async_trait]
impl AlarmStore for SqliteStorage {
    async fn create(&self, alarm: Alarm) -> Result<Alarm, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO alarms (id, event_path, event_uid, action, recipient, due_date,
                                alarm_index, summary, snapshot, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alarm.id.to_string())
        .bind(alarm.event_path.as_str())
        .bind(&alarm.event_uid)
        .bind(alarm.action.as_str())
        .bind(&alarm.recipient)
        .bind(to_millis(alarm.due_date))
        .bind(alarm.alarm_index as i64)
        .bind(&alarm.summary)
        .bind(&alarm.snapshot)
        .bind(alarm.state.as_str())
        .bind(to_millis(alarm.created_at))
        .bind(to_millis(alarm.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(alarm),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!("alarm: {}", alarm.id)))
            }
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn remove(&self, filter: &AlarmFilter) -> Result<usize, StorageError> {
        let path = filter.require_event_path()?;
        let state = filter.state.map(|s| s.as_str());

        let result = sqlx::query(
            "DELETE FROM alarms WHERE event_path = ? AND (? IS NULL OR state = ?)",
        )
        .bind(path.as_str())
        .bind(state)
        .bind(state)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }

    async fn set_state(&self, alarm: &Alarm, state: AlarmState) -> Result<Alarm, StorageError> {
        check_transition(alarm.state, state)?;

        let result = sqlx::query("UPDATE alarms SET state = ?, updated_at = ? WHERE id = ? AND state = ?")
            .bind(state.as_str())
            .bind(to_millis(Utc::now()))
            .bind(alarm.id.to_string())
            .bind(alarm.state.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 1 {
            return self.get(&alarm.id).await;
        }

        match self.current_state(&alarm.id).await? {
            Some(actual) => Err(StorageError::TransitionFailed {
                id: alarm.id,
                expected: alarm.state,
                actual,
            }),
            None => Err(StorageError::NotFound(format!("alarm: {}", alarm.id))),
        }
    }

    async fn get_alarms_to_handle(&self, now: DateTime<Utc>) -> Result<Vec<Alarm>, StorageError> {
        let rows: Vec<AlarmRow> = sqlx::query_as(&format!(
            "{} WHERE state = ? AND due_date <= ? ORDER BY due_date, created_at",
            SELECT_COLUMNS
        ))
        .bind(AlarmState::Waiting.as_str())
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(row_to_alarm).collect()
    }

    async fn get(&self, id: &AlarmId) -> Result<Alarm, StorageError> {
        let row: AlarmRow = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(format!("alarm: {}", id)))?;

        row_to_alarm(row)
    }

    async fn list(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>, StorageError> {
        let path = filter.event_path.as_ref().map(|p| p.as_str());
        let state = filter.state.map(|s| s.as_str());

        let rows: Vec<AlarmRow> = sqlx::query_as(&format!(
            "{} WHERE (? IS NULL OR event_path = ?) AND (? IS NULL OR state = ?) \
             ORDER BY due_date, created_at",
            SELECT_COLUMNS
        ))
        .bind(path)
        .bind(path)
        .bind(state)
        .bind(state)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(row_to_alarm).collect()
    }
}
