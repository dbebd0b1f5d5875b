//! YAML configuration parsing.
//!
//! Parses the service configuration (reveil.yaml).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::ConfigError;
use crate::core::retry::{RetryCondition, RetryPolicy};
use crate::queue::DEFAULT_BUFFER;
use crate::scheduler::{DEFAULT_MAX_CONCURRENT_ALARMS, DEFAULT_TICK_INTERVAL};

/// Service configuration (reveil.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReveilConfig {
    /// Seconds between scan ticks.
    pub tick_interval_secs: u64,
    /// Alarms processed concurrently within a tick.
    pub max_concurrent_alarms: usize,
    /// Margin added to the re-arm window start.
    pub lookahead_secs: u64,
    /// How long shutdown waits for queued deliveries.
    pub shutdown_timeout_secs: u64,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Job queue configuration.
    pub queue: QueueConfig,
    /// Outgoing mail for EMAIL alarms. Without it no email handler is registered.
    pub smtp: Option<SmtpConfig>,
}

impl Default for ReveilConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL.as_secs(),
            max_concurrent_alarms: DEFAULT_MAX_CONCURRENT_ALARMS,
            lookahead_secs: crate::rearm::DEFAULT_LOOKAHEAD_SECS as u64,
            shutdown_timeout_secs: 30,
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            smtp: None,
        }
    }
}

impl ReveilConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Saturates at the largest representable duration.
    pub fn lookahead(&self) -> chrono::Duration {
        i64::try_from(self.lookahead_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Job queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending jobs per handler before submissions wait.
    pub buffer: usize,
    /// Retry policy for failed deliveries.
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_BUFFER,
            retry: RetryPolicy::fixed(3, Duration::from_secs(30))
                .with_condition(RetryCondition::TransientOnly),
        }
    }
}

/// SMTP relay for the email handler.
///
/// Credentials are read from `SMTP_USERNAME` and `SMTP_PASSWORD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    /// Defaults to 587. Port 465 selects implicit TLS.
    #[serde(default)]
    pub port: Option<u16>,
    /// Require an encrypted connection.
    #[serde(default = "default_true")]
    pub tls: bool,
    /// Sender mailbox, e.g. `Reminders <reminders@example.com>`.
    pub from: String,
}

fn default_true() -> bool {
    true
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load the service configuration from a file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<ReveilConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_config(&content)
    }

    /// Parse the service configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<ReveilConfig, ConfigError> {
        let config: ReveilConfig = serde_yaml::from_str(yaml)?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Validate the service configuration.
    fn validate_config(config: &ReveilConfig) -> Result<(), ConfigError> {
        if config.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "tick_interval_secs must be greater than zero".into(),
            ));
        }

        if config.max_concurrent_alarms == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_concurrent_alarms must be greater than zero".into(),
            ));
        }

        if config.queue.buffer == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue.buffer must be greater than zero".into(),
            ));
        }

        if let StorageConfig::Sqlite { path } = &config.storage
            && path.trim().is_empty()
        {
            return Err(ConfigError::InvalidConfig(
                "storage.path must not be empty".into(),
            ));
        }

        if let Some(smtp) = &config.smtp {
            if smtp.host.trim().is_empty() {
                return Err(ConfigError::InvalidConfig("smtp.host must not be empty".into()));
            }
            if smtp.from.trim().is_empty() {
                return Err(ConfigError::InvalidConfig("smtp.from must not be empty".into()));
            }
        }

        Ok(())
    }
}
