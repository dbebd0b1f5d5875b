//! Retry policy for alarm deliveries.
//!
//! Used by the local job queue when a handler fails to deliver an alarm.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a failed delivery is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (0 = deliver once).
    #[serde(default)]
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    #[serde(rename = "delay_secs", with = "serde_duration", default)]
    pub delay: Duration,

    /// Which failures are retried.
    #[serde(rename = "condition", default)]
    pub retry_on: RetryCondition,
}

/// Which delivery failures are worth another attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCondition {
    /// Retry on any error.
    #[default]
    Always,

    /// Retry only errors the handler reports as transient (connection
    /// refused, SMTP 4xx).
    TransientOnly,

    /// Never retry, regardless of max_attempts.
    Never,
}

impl RetryPolicy {
    /// Deliver once, never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
            retry_on: RetryCondition::Never,
        }
    }

    /// Retry up to `max_attempts` times, waiting `delay` between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            retry_on: RetryCondition::Always,
        }
    }

    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_on = condition;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0 && self.retry_on != RetryCondition::Never
    }

    /// Whether another attempt should follow a failure.
    ///
    /// `attempts` counts every attempt made so far, including the initial
    /// one; `transient` is the failed attempt's classification.
    pub fn should_retry(&self, attempts: u32, transient: bool) -> bool {
        match self.retry_on {
            RetryCondition::Never => false,
            RetryCondition::TransientOnly if !transient => false,
            _ => attempts <= self.max_attempts,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Duration as whole seconds, matching the YAML config.
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
