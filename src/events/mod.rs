//! Calendar change notifications.
//!
//! A small in-process publish/subscribe bus carrying `event.created`,
//! `event.updated` and `event.deleted` notifications to subscribers such as
//! the alarm listener.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::types::EventPath;

/// Notification topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "event.created")]
    EventCreated,
    #[serde(rename = "event.updated")]
    EventUpdated,
    #[serde(rename = "event.deleted")]
    EventDeleted,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::EventCreated, Topic::EventUpdated, Topic::EventDeleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::EventCreated => "event.created",
            Topic::EventUpdated => "event.updated",
            Topic::EventDeleted => "event.deleted",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown topic: {}", s))
    }
}

/// Payload of a change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventNotification {
    pub event_path: EventPath,
    /// VCALENDAR text of the event; empty for deletions.
    #[serde(default)]
    pub event: String,
}

impl EventNotification {
    pub fn new(event_path: impl Into<EventPath>, event: impl Into<String>) -> Self {
        Self {
            event_path: event_path.into(),
            event: event.into(),
        }
    }

    /// Notification for a deleted calendar object.
    pub fn deleted(event_path: impl Into<EventPath>) -> Self {
        Self::new(event_path, String::new())
    }
}

/// Receives notifications for the topics it is subscribed to.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, topic: Topic, notification: &EventNotification);
}

/// Topic-based notification bus.
pub struct NotificationBus {
    subscribers: RwLock<Vec<(Topic, Arc<dyn NotificationHandler>)>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe `handler` to `topic`.
    pub async fn subscribe(&self, topic: Topic, handler: Arc<dyn NotificationHandler>) {
        self.subscribers.write().await.push((topic, handler));
    }

    /// Deliver a notification to every subscriber of `topic`, in
    /// subscription order.
    pub async fn publish(&self, topic: Topic, notification: EventNotification) {
        let handlers: Vec<_> = self
            .subscribers
            .read()
            .await
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, h)| Arc::clone(h))
            .collect();

        tracing::debug!(
            topic = %topic,
            event_path = %notification.event_path,
            subscribers = handlers.len(),
            "Publishing notification"
        );
        for handler in handlers {
            handler.handle(topic, &notification).await;
        }
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|(t, _)| *t == topic)
            .count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
