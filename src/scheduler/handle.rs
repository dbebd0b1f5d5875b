//! Control handle for a running scan loop.

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};

use super::types::{SchedulerCommand, SchedulerError, SchedulerState, TickReport};

/// Pending commands a handle can queue before `send` waits.
const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Cloneable handle that sends commands to the scheduler task.
///
/// Every command waits for the loop to acknowledge it, so once `pause`
/// returns no further periodic tick starts.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    state: Arc<RwLock<SchedulerState>>,
}

impl SchedulerHandle {
    /// Create a handle sharing `state` with the loop, plus the receiving end
    /// the loop reads commands from.
    pub(crate) fn new(
        state: Arc<RwLock<SchedulerState>>,
    ) -> (Self, mpsc::Receiver<SchedulerCommand>) {
        let (commands, receiver) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        (Self { commands, state }, receiver)
    }

    /// Send one command and wait for the loop's reply.
    async fn request<R>(
        &self,
        command: &'static str,
        build: impl FnOnce(oneshot::Sender<R>) -> SchedulerCommand,
    ) -> Result<R, SchedulerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let closed = || SchedulerError::ChannelError(format!("scheduler stopped before {}", command));

        self.commands.send(build(reply_tx)).await.map_err(|_| closed())?;
        reply_rx.await.map_err(|_| closed())
    }

    /// Run a scan tick now and return its report.
    ///
    /// Works while paused. The tick runs inside the scheduler task, so it
    /// never overlaps a periodic tick.
    pub async fn tick_now(&self) -> Result<TickReport, SchedulerError> {
        self.request("tick", |response| SchedulerCommand::TickNow { response })
            .await?
    }

    /// Stop periodic ticks. Manual ticks are still served.
    pub async fn pause(&self) -> Result<(), SchedulerError> {
        self.request("pause", |response| SchedulerCommand::Pause { response })
            .await
    }

    pub async fn resume(&self) -> Result<(), SchedulerError> {
        self.request("resume", |response| SchedulerCommand::Resume { response })
            .await
    }

    /// Stop the loop once any in-flight tick has finished.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.request("shutdown", |response| SchedulerCommand::Shutdown { response })
            .await
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }
}
