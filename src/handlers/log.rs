use async_trait::async_trait;

use super::{AlarmHandler, DeliveryOutcome, HandlerError};
use crate::core::alarm::{Alarm, AlarmAction};

/// Writes DISPLAY reminders to the log.
///
/// Alarms of untitled events are skipped.
pub struct LogHandler {
    actions: Vec<AlarmAction>,
}

impl LogHandler {
    pub fn new() -> Self {
        Self {
            actions: vec![AlarmAction::Display],
        }
    }
}

impl Default for LogHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlarmHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    fn actions(&self) -> &[AlarmAction] {
        &self.actions
    }

    async fn deliver(&self, alarm: &Alarm) -> Result<DeliveryOutcome, HandlerError> {
        let Some(summary) = alarm.summary.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(DeliveryOutcome::Skipped("event has no summary".to_string()));
        };
        tracing::info!(
            alarm_id = %alarm.id,
            event_path = %alarm.event_path,
            due_date = %alarm.due_date,
            summary,
            "Reminder"
        );
        Ok(DeliveryOutcome::Delivered)
    }
}
