//! Alarm delivery handlers and the registry that maps actions to them.

mod email;
mod log;

pub use email::EmailHandler;
pub use log::LogHandler;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::alarm::{Alarm, AlarmAction};

/// Errors a handler reports when delivery fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The alarm carries no recipient and the action needs one.
    #[error("alarm has no recipient")]
    MissingRecipient,

    /// Handler setup is invalid (bad address, unreachable relay name).
    #[error("handler configuration error: {0}")]
    Config(String),

    /// Delivery failed but may succeed later.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Delivery failed and will not succeed on retry.
    #[error("delivery failed: {0}")]
    Permanent(String),
}

impl HandlerError {
    /// Whether a retry could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// What a successful delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Nothing to do for this alarm; the reason is logged.
    Skipped(String),
}

/// A named delivery capability for one or more alarm actions.
#[async_trait]
pub trait AlarmHandler: Send + Sync {
    /// Unique handler name.
    fn name(&self) -> &str;

    /// Actions this handler can deliver.
    fn actions(&self) -> &[AlarmAction];

    /// Deliver one alarm.
    async fn deliver(&self, alarm: &Alarm) -> Result<DeliveryOutcome, HandlerError>;
}

/// Errors from handler registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("handler already registered: {0}")]
    DuplicateName(String),
}

/// Registered handlers, in registration order.
pub struct HandlerRegistry {
    handlers: RwLock<Vec<Arc<dyn AlarmHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler for the actions it declares.
    pub async fn register(&self, handler: Arc<dyn AlarmHandler>) -> Result<(), RegistryError> {
        let mut handlers = self.handlers.write().await;
        if handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(RegistryError::DuplicateName(handler.name().to_string()));
        }
        handlers.push(handler);
        Ok(())
    }

    /// Handlers able to deliver `action`, in registration order.
    pub async fn handlers_for_action(&self, action: AlarmAction) -> Vec<Arc<dyn AlarmHandler>> {
        self.handlers
            .read()
            .await
            .iter()
            .filter(|h| h.actions().contains(&action))
            .cloned()
            .collect()
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
