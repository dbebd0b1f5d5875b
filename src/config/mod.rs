//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the alarm service.

mod error;
mod yaml;

pub use error::ConfigError;
pub use yaml::{QueueConfig, ReveilConfig, SmtpConfig, StorageConfig, YamlLoader};
