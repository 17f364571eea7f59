use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use secrecy::ExposeSecret;

use super::{EmailNotification, EventPublisher, LifecycleEvent, TOPIC_NOTIFICATIONS, TOPIC_USER_LIFECYCLE};
use crate::config::RedisConfig;
use crate::services::metrics;

/// Upper bound on stream length; older entries are trimmed approximately.
const STREAM_MAX_LEN: usize = 100_000;

/// Publishes JSON payloads to Redis Streams with `XADD`.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    manager: ConnectionManager,
}

/// Open a reconnecting connection to Redis.
pub async fn connect(config: &RedisConfig) -> Result<ConnectionManager, anyhow::Error> {
    tracing::info!("Connecting to Redis");
    let client = Client::open(config.url.expose_secret().as_str())?;

    // ConnectionManager reconnects automatically
    let manager = client.get_connection_manager().await.map_err(|e| {
        tracing::error!("Failed to get Redis connection manager: {}", e);
        anyhow::anyhow!("Failed to connect to Redis: {}", e)
    })?;

    tracing::info!("Successfully connected to Redis");
    Ok(manager)
}

impl RedisStreamPublisher {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }

    async fn xadd(
        &self,
        stream: &'static str,
        event_type: &str,
        payload: String,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(STREAM_MAX_LEN)
            .arg("*")
            .arg("event_type")
            .arg(event_type)
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to publish to {}: {}", stream, e))?;

        metrics::record_event_published(stream);
        tracing::debug!(stream, event_type, entry_id = %id, "Event published");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish_lifecycle(&self, event: &LifecycleEvent) -> Result<(), anyhow::Error> {
        let payload = serde_json::to_string(event)?;
        self.xadd(TOPIC_USER_LIFECYCLE, event.event_type(), payload).await
    }

    async fn publish_notification(
        &self,
        notification: &EmailNotification,
    ) -> Result<(), anyhow::Error> {
        let payload = serde_json::to_string(notification)?;
        self.xadd(TOPIC_NOTIFICATIONS, "email_notification", payload).await
    }
}
