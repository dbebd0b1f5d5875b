//! EMAIL alarms delivered through SMTP with `lettre`.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{AlarmHandler, DeliveryOutcome, HandlerError};
use crate::config::SmtpConfig;
use crate::core::alarm::{Alarm, AlarmAction};

/// Sends EMAIL alarms to the alarm's recipient.
pub struct EmailHandler {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    actions: Vec<AlarmAction>,
}

impl EmailHandler {
    /// Build the handler from SMTP settings.
    ///
    /// Port 465 uses implicit TLS; other ports use STARTTLS unless `tls` is
    /// false. Credentials come from `SMTP_USERNAME` and `SMTP_PASSWORD` when
    /// both are set.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, HandlerError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| HandlerError::Config(e.to_string()))?;

        let port = config.port.unwrap_or(587);
        let mut builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| HandlerError::Config(e.to_string()))?
                .port(port)
        } else if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| HandlerError::Config(e.to_string()))?
                .port(port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(port)
        };

        if let (Ok(username), Ok(password)) =
            (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD"))
        {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            actions: vec![AlarmAction::Email],
        })
    }

    fn build_message(&self, alarm: &Alarm) -> Result<Message, HandlerError> {
        let recipient = alarm
            .recipient
            .as_deref()
            .ok_or(HandlerError::MissingRecipient)?;
        let to: Mailbox = recipient
            .parse()
            .map_err(|e: lettre::address::AddressError| HandlerError::Permanent(e.to_string()))?;

        let title = alarm.summary.as_deref().unwrap_or("Untitled event");
        let body = format!(
            "Reminder: {}\n\nAlarm time: {}\nCalendar object: {}\n",
            title,
            alarm.due_date.format("%Y-%m-%d %H:%M UTC"),
            alarm.event_path,
        );

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(format!("Reminder: {}", title))
            .body(body)
            .map_err(|e| HandlerError::Permanent(e.to_string()))
    }
}

#[async_trait]
impl AlarmHandler for EmailHandler {
    fn name(&self) -> &str {
        "email"
    }

    fn actions(&self) -> &[AlarmAction] {
        &self.actions
    }

    async fn deliver(&self, alarm: &Alarm) -> Result<DeliveryOutcome, HandlerError> {
        let email = self.build_message(alarm)?;

        self.transport.send(email).await.map_err(|e| {
            if e.is_permanent() {
                HandlerError::Permanent(e.to_string())
            } else {
                HandlerError::Transient(e.to_string())
            }
        })?;

        tracing::info!(
            alarm_id = %alarm.id,
            event_path = %alarm.event_path,
            recipient = alarm.recipient.as_deref().unwrap_or(""),
            "Reminder email sent"
        );
        Ok(DeliveryOutcome::Delivered)
    }
}
