//! Service wiring: handlers, queue, scheduler and change listener.
//!
//! [`AlarmService::init`] starts everything exactly once and returns a
//! [`ServiceHandle`] used to stop it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ReveilConfig;
use crate::events::{NotificationBus, Topic};
use crate::handlers::{
    AlarmHandler, EmailHandler, HandlerError, HandlerRegistry, LogHandler, RegistryError,
};
use crate::listener::EventChangeListener;
use crate::queue::{JobQueue, LocalJobQueue, QueueError};
use crate::rearm::Rearmer;
use crate::scheduler::{
    AlarmScheduler, DEFAULT_MAX_CONCURRENT_ALARMS, DEFAULT_TICK_INTERVAL, SchedulerError,
    SchedulerHandle,
};
use crate::storage::AlarmStore;

/// Errors from service setup and teardown.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `init` was already called on this service.
    #[error("alarm service already initialized")]
    AlreadyInitialized,

    #[error("handler registration failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("handler setup failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// The alarm service.
pub struct AlarmService<S: AlarmStore> {
    store: Arc<S>,
    registry: Arc<HandlerRegistry>,
    queue: Arc<dyn JobQueue>,
    bus: Arc<NotificationBus>,
    handlers: Vec<Arc<dyn AlarmHandler>>,
    tick_interval: Duration,
    max_concurrent_alarms: usize,
    lookahead: chrono::Duration,
    shutdown_timeout: Duration,
    initialized: AtomicBool,
}

impl<S: AlarmStore + 'static> AlarmService<S> {
    /// Create a service with no handlers and default timings.
    pub fn new(store: Arc<S>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            store,
            registry: Arc::new(HandlerRegistry::new()),
            queue,
            bus: Arc::new(NotificationBus::new()),
            handlers: Vec::new(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_concurrent_alarms: DEFAULT_MAX_CONCURRENT_ALARMS,
            lookahead: chrono::Duration::seconds(crate::rearm::DEFAULT_LOOKAHEAD_SECS),
            shutdown_timeout: Duration::from_secs(30),
            initialized: AtomicBool::new(false),
        }
    }

    /// Create a service from configuration.
    ///
    /// Uses a [`LocalJobQueue`] and the default handlers: [`LogHandler`] for
    /// DISPLAY and, when `smtp` is configured, [`EmailHandler`] for EMAIL.
    pub fn from_config(store: Arc<S>, config: &ReveilConfig) -> Result<Self, ServiceError> {
        let queue = LocalJobQueue::new()
            .with_buffer(config.queue.buffer)
            .with_retry_policy(config.queue.retry.clone());

        let mut service = Self::new(store, Arc::new(queue))
            .with_tick_interval(config.tick_interval())
            .with_max_concurrent_alarms(config.max_concurrent_alarms)
            .with_lookahead(config.lookahead())
            .with_shutdown_timeout(config.shutdown_timeout())
            .with_handler(Arc::new(LogHandler::new()));

        if let Some(smtp) = &config.smtp {
            service = service.with_handler(Arc::new(EmailHandler::from_config(smtp)?));
        } else {
            tracing::warn!("No SMTP relay configured, EMAIL alarms will be unhandled");
        }
        Ok(service)
    }

    /// Register `handler` during [`init`](Self::init).
    pub fn with_handler(mut self, handler: Arc<dyn AlarmHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_max_concurrent_alarms(mut self, max: usize) -> Self {
        self.max_concurrent_alarms = max;
        self
    }

    pub fn with_lookahead(mut self, lookahead: chrono::Duration) -> Self {
        self.lookahead = lookahead;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Bus that calendar change notifications are published on.
    pub fn bus(&self) -> Arc<NotificationBus> {
        Arc::clone(&self.bus)
    }

    /// Register a handler and bind it to queue consumption.
    pub async fn register_handler(&self, handler: Arc<dyn AlarmHandler>) -> Result<(), ServiceError> {
        self.registry.register(Arc::clone(&handler)).await?;
        self.queue.create_worker(Arc::clone(&handler)).await?;
        tracing::info!(handler = %handler.name(), actions = ?handler.actions(), "Handler registered");
        Ok(())
    }

    /// Register the configured handlers, start the scan loop and subscribe
    /// the change listener to every event topic.
    ///
    /// May be called once per service, whatever its outcome; later calls
    /// return [`ServiceError::AlreadyInitialized`].
    pub async fn init(&self) -> Result<ServiceHandle, ServiceError> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ServiceError::AlreadyInitialized);
        }

        for handler in &self.handlers {
            self.register_handler(Arc::clone(handler)).await?;
        }

        let rearmer = Rearmer::new(Arc::clone(&self.store)).with_lookahead(self.lookahead);
        let scheduler = AlarmScheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.queue),
        )
        .with_tick_interval(self.tick_interval)
        .with_max_concurrent_alarms(self.max_concurrent_alarms)
        .with_rearmer(rearmer);
        let (scheduler, task) = scheduler.start();

        let listener = Arc::new(EventChangeListener::new(Arc::clone(&self.store)));
        for topic in Topic::ALL {
            self.bus.subscribe(topic, listener.clone()).await;
        }

        tracing::info!(
            handlers = self.registry.handler_count().await,
            tick_interval = ?self.tick_interval,
            "Alarm service initialized"
        );

        Ok(ServiceHandle {
            scheduler,
            task,
            queue: Arc::clone(&self.queue),
            shutdown_timeout: self.shutdown_timeout,
        })
    }
}

/// Handle to a running service.
pub struct ServiceHandle {
    scheduler: SchedulerHandle,
    task: JoinHandle<()>,
    queue: Arc<dyn JobQueue>,
    shutdown_timeout: Duration,
}

impl ServiceHandle {
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Stop the scan loop, then drain the job queue.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        self.scheduler.shutdown().await?;
        let _ = self.task.await;
        self.queue.shutdown(self.shutdown_timeout).await?;
        tracing::info!("Alarm service stopped");
        Ok(())
    }
}
