pub mod config;
pub mod core;
pub mod events;
pub mod handlers;
pub mod listener;
pub mod queue;
pub mod rearm;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod testing;

pub use config::{ConfigError, ReveilConfig, YamlLoader};
pub use crate::core::alarm::{Alarm, AlarmAction, AlarmState};
pub use crate::core::event::CalendarEvent;
pub use crate::core::recurrence::{RRuleEngine, RecurrenceEngine, RecurrenceError};
pub use crate::core::retry::{RetryCondition, RetryPolicy};
pub use crate::core::types::{AlarmId, EventPath, JobId};
pub use events::{EventNotification, NotificationBus, NotificationHandler, Topic};
pub use handlers::{AlarmHandler, DeliveryOutcome, HandlerError, HandlerRegistry};
pub use listener::{EventChangeListener, ListenerError};
pub use queue::{JobQueue, LocalJobQueue, QueueError};
pub use rearm::{RearmError, Rearmer};
pub use scheduler::{AlarmScheduler, SchedulerError, SchedulerHandle, SchedulerState, TickReport};
pub use service::{AlarmService, ServiceError, ServiceHandle};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{AlarmFilter, AlarmStore, InMemoryStorage, StorageError};
