use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;

use super::{EmailNotification, EventPublisher, Notifier};
use crate::config::SmtpConfig;

/// Hands mail to the external notification service over the event bus.
#[derive(Clone)]
pub struct BrokerNotifier {
    publisher: Arc<dyn EventPublisher>,
}

impl BrokerNotifier {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Notifier for BrokerNotifier {
    async fn send_email(&self, notification: &EmailNotification) -> Result<(), anyhow::Error> {
        self.publisher.publish_notification(notification).await?;
        tracing::info!(subject = %notification.subject, "Email request queued for notification service");
        Ok(())
    }
}

/// Sends mail directly through an SMTP relay.
#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let creds = Credentials::new(config.user.clone(), config.password.expose_secret().clone());

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", config.host, e))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, port = config.port, "SMTP notifier initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_email(&self, notification: &EmailNotification) -> Result<(), anyhow::Error> {
        let email = Message::builder()
            .from(self.from_email.parse()?)
            .to(notification.to.parse()?)
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email)).await?;

        match result {
            Ok(_) => {
                tracing::info!(subject = %notification.subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, subject = %notification.subject, "Failed to send email");
                Err(anyhow::anyhow!("SMTP delivery failed: {}", e))
            }
        }
    }
}
