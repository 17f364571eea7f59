use backoff::future::retry;
use backoff::ExponentialBackoff;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::EventsConfig;
use crate::events::{LifecycleEvent, TenantProvisioned, TOPIC_TENANT_PROVISIONED, TOPIC_USER_LIFECYCLE};
use crate::services::metrics;
use crate::services::{Choreographer, ServiceError};

/// Own pending entries, re-driven once at startup.
const PENDING_CURSOR: &str = "0";
/// Entries never delivered to this group.
const NEW_CURSOR: &str = ">";

/// Lifecycle event types that drive onboarding; the rest are acked unread.
const ONBOARDING_EVENT_TYPES: [&str; 2] = ["user_created", "user_invited"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    TenantProvisioned,
    UserLifecycle,
}

impl Subscription {
    pub fn stream(&self) -> &'static str {
        match self {
            Subscription::TenantProvisioned => TOPIC_TENANT_PROVISIONED,
            Subscription::UserLifecycle => TOPIC_USER_LIFECYCLE,
        }
    }
}

/// How a delivered entry was disposed of. Only `Failed` stays unacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Handled,
    Skipped,
    Poison,
    Failed,
}

impl Delivery {
    pub fn should_ack(&self) -> bool {
        !matches!(self, Delivery::Failed)
    }
}

enum Inbound {
    Tenant(TenantProvisioned),
    Lifecycle(LifecycleEvent),
}

/// Decodes stream payloads and runs them through the choreographer with
/// bounded exponential retry.
#[derive(Clone)]
pub struct EventDispatcher {
    choreographer: Choreographer,
    max_retry: Duration,
}

impl EventDispatcher {
    pub fn new(choreographer: Choreographer, max_retry: Duration) -> Self {
        Self {
            choreographer,
            max_retry,
        }
    }

    pub async fn deliver(
        &self,
        subscription: Subscription,
        event_type: Option<&str>,
        payload: Option<&str>,
    ) -> Delivery {
        let topic = subscription.stream();

        if subscription == Subscription::UserLifecycle {
            if let Some(event_type) = event_type {
                if !ONBOARDING_EVENT_TYPES.contains(&event_type) {
                    tracing::debug!(topic, event_type, "Ignoring lifecycle event");
                    return Delivery::Skipped;
                }
            }
        }

        let Some(payload) = payload else {
            tracing::error!(topic, "Stream entry has no payload field, dropping");
            metrics::record_event_failed(topic, "poison");
            return Delivery::Poison;
        };

        let inbound = match decode(subscription, payload) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::error!(topic, error = %e, payload, "Undecodable event, dropping");
                metrics::record_event_failed(topic, "poison");
                return Delivery::Poison;
            }
        };

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.max_retry),
            ..Default::default()
        };

        let result = retry(policy, || async {
            self.dispatch(&inbound).await.map_err(|e| match e {
                ServiceError::InvalidArgument(_) => backoff::Error::permanent(e),
                e => {
                    tracing::warn!(topic, error = %e, "Event handler failed, will retry");
                    backoff::Error::transient(e)
                }
            })
        })
        .await;

        match result {
            Ok(()) => {
                metrics::record_event_consumed(topic);
                Delivery::Handled
            }
            Err(ServiceError::InvalidArgument(reason)) => {
                tracing::error!(topic, reason = %reason, "Event rejected, dropping");
                metrics::record_event_failed(topic, "rejected");
                Delivery::Poison
            }
            Err(e) => {
                tracing::error!(topic, error = %e, "Event handler gave up, leaving entry pending");
                metrics::record_event_failed(topic, "exhausted");
                Delivery::Failed
            }
        }
    }

    async fn dispatch(&self, inbound: &Inbound) -> Result<(), ServiceError> {
        match inbound {
            Inbound::Tenant(event) => {
                let stage = self.choreographer.handle_tenant_provisioned(event).await?;
                tracing::info!(tenant_id = %event.tenant_id, stage = ?stage, "Tenant provisioned event handled");
            }
            Inbound::Lifecycle(event) => {
                if let Some(stage) = self.choreographer.handle_lifecycle_event(event).await? {
                    tracing::info!(user_id = %event.user_id(), stage = ?stage, "Lifecycle event handled");
                }
            }
        }
        Ok(())
    }
}

fn decode(subscription: Subscription, payload: &str) -> Result<Inbound, serde_json::Error> {
    Ok(match subscription {
        Subscription::TenantProvisioned => Inbound::Tenant(serde_json::from_str(payload)?),
        Subscription::UserLifecycle => Inbound::Lifecycle(serde_json::from_str(payload)?),
    })
}

/// Consumer-group reader for one stream.
///
/// Each consumer needs its own connection: `XREADGROUP ... BLOCK` holds the
/// connection for the whole block period.
pub struct EventConsumer {
    subscription: Subscription,
    dispatcher: EventDispatcher,
    manager: ConnectionManager,
    config: EventsConfig,
    shutdown: CancellationToken,
}

impl EventConsumer {
    pub fn new(
        subscription: Subscription,
        dispatcher: EventDispatcher,
        manager: ConnectionManager,
        config: EventsConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            subscription,
            dispatcher,
            manager,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let stream = self.subscription.stream();
        tracing::info!(
            stream,
            group = %self.config.consumer_group,
            consumer = %self.config.consumer_name,
            "Event consumer starting"
        );

        while let Err(e) = self.ensure_group().await {
            tracing::error!(stream, error = %e, "Failed to create consumer group");
            if self.pause().await {
                return;
            }
        }

        let shutdown = self.shutdown.clone();
        let mut cursor = PENDING_CURSOR.to_string();

        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = self.read(&cursor) => read,
            };

            let entries = match read {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(stream, error = %e, "XREADGROUP failed");
                    if self.pause().await {
                        break;
                    }
                    continue;
                }
            };

            if cursor != NEW_CURSOR {
                match entries.last() {
                    // Continue past entries that fail again.
                    Some(last) => cursor = last.id.clone(),
                    None => {
                        tracing::info!(stream, "Pending entries re-driven");
                        cursor = NEW_CURSOR.to_string();
                        continue;
                    }
                }
            }

            for entry in entries {
                self.process(entry).await;
            }
        }

        tracing::info!(stream, "Event consumer stopped");
    }

    async fn process(&mut self, entry: StreamId) {
        let event_type: Option<String> = entry.get("event_type");
        let payload: Option<String> = entry.get("payload");

        let delivery = self
            .dispatcher
            .deliver(self.subscription, event_type.as_deref(), payload.as_deref())
            .await;

        if delivery.should_ack() {
            if let Err(e) = self.ack(&entry.id).await {
                tracing::warn!(entry_id = %entry.id, error = %e, "XACK failed, entry will be redelivered");
            }
        }
    }

    /// Returns `true` when shutdown was requested while waiting.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(Duration::from_secs(1)) => false,
        }
    }

    async fn ensure_group(&mut self) -> Result<(), redis::RedisError> {
        let created: Result<(), redis::RedisError> = self
            .manager
            .xgroup_create_mkstream(
                self.subscription.stream(),
                &self.config.consumer_group,
                "0",
            )
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn read(&mut self, cursor: &str) -> Result<Vec<StreamId>, redis::RedisError> {
        let mut options = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_name)
            .count(self.config.batch_size);
        if cursor == NEW_CURSOR {
            options = options.block(self.config.block_ms);
        }

        let reply: StreamReadReply = self
            .manager
            .xread_options(&[self.subscription.stream()], &[cursor], &options)
            .await?;

        Ok(reply.keys.into_iter().flat_map(|key| key.ids).collect())
    }

    async fn ack(&mut self, id: &str) -> Result<(), redis::RedisError> {
        let _: i64 = self
            .manager
            .xack(self.subscription.stream(), &self.config.consumer_group, &[id])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{InMemoryPublisher, RecordingNotifier};
    use crate::models::UserStatus;
    use crate::services::store::{InMemoryStore, UserDirectory};
    use crate::services::{CredentialLifecycle, UserService};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Harness {
        store: Arc<InMemoryStore>,
        notifier: Arc<RecordingNotifier>,
        dispatcher: EventDispatcher,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let publisher = Arc::new(InMemoryPublisher::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let lifecycle = Arc::new(CredentialLifecycle::new(
            store.clone(),
            store.clone(),
            publisher.clone(),
            notifier.clone(),
            crate::config::test_config().tokens,
        ));
        let users = UserService::new(store.clone(), store.clone(), publisher.clone());
        let choreographer = Choreographer::new(store.clone(), users, lifecycle, publisher);
        Harness {
            store,
            notifier,
            dispatcher: EventDispatcher::new(choreographer, Duration::ZERO),
        }
    }

    #[tokio::test]
    async fn tenant_provisioned_payload_creates_admin() -> Result<(), anyhow::Error> {
        let h = harness();
        let tenant_id = Uuid::new_v4();
        let payload = json!({
            "tenant_id": tenant_id,
            "admin_email": "a@x.com",
            "admin_full_name": "A",
        })
        .to_string();

        let delivery = h
            .dispatcher
            .deliver(Subscription::TenantProvisioned, None, Some(&payload))
            .await;
        assert_eq!(delivery, Delivery::Handled);

        let user = h.store.get_user_by_email(tenant_id, "a@x.com").await?;
        assert_eq!(user.map(|u| u.status), Some(UserStatus::PendingSetup));
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_payload_is_poison_and_acked() {
        let h = harness();
        let delivery = h
            .dispatcher
            .deliver(Subscription::TenantProvisioned, None, Some("{not json"))
            .await;
        assert_eq!(delivery, Delivery::Poison);
        assert!(delivery.should_ack());

        let delivery = h
            .dispatcher
            .deliver(Subscription::TenantProvisioned, None, None)
            .await;
        assert_eq!(delivery, Delivery::Poison);
    }

    #[tokio::test]
    async fn non_onboarding_lifecycle_events_are_skipped() {
        let h = harness();
        let delivery = h
            .dispatcher
            .deliver(Subscription::UserLifecycle, Some("user_login"), Some("{}"))
            .await;
        assert_eq!(delivery, Delivery::Skipped);
        assert!(delivery.should_ack());
    }

    #[tokio::test]
    async fn notification_outage_leaves_entry_pending() -> Result<(), anyhow::Error> {
        let h = harness();
        let user = crate::models::User::new(
            Uuid::new_v4(),
            "b@x.com".to_string(),
            "B".to_string(),
            UserStatus::PendingInvite,
        );
        h.store.create_user(&user).await?;
        h.notifier.set_failing(true);

        let payload = serde_json::to_string(&LifecycleEvent::UserInvited {
            user_id: user.user_id,
            tenant_id: user.tenant_id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
        })?;

        let delivery = h
            .dispatcher
            .deliver(Subscription::UserLifecycle, Some("user_invited"), Some(&payload))
            .await;
        assert_eq!(delivery, Delivery::Failed);
        assert!(!delivery.should_ack());
        Ok(())
    }

    #[tokio::test]
    async fn blank_admin_email_is_rejected_without_retry() {
        let h = harness();
        let payload = json!({
            "tenant_id": Uuid::new_v4(),
            "admin_email": "  ",
            "admin_full_name": "A",
        })
        .to_string();

        let delivery = h
            .dispatcher
            .deliver(Subscription::TenantProvisioned, None, Some(&payload))
            .await;
        assert_eq!(delivery, Delivery::Poison);
    }
}
