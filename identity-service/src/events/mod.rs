//! Event contracts and the publishing/notification capabilities.
//!
//! Three streams carry the onboarding choreography:
//!
//! - `iam.create-initial-admin`: tenant-provisioned events from the tenant service.
//! - `user.lifecycle`: user events this service produces and also consumes.
//! - `notification.send-password-setup`: email requests for the notification service.

mod memory;
mod notifier;
mod redis_stream;

pub use memory::{InMemoryPublisher, RecordingNotifier};
pub use notifier::{BrokerNotifier, SmtpNotifier};
pub use redis_stream::{connect as connect_redis, RedisStreamPublisher};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::UserStatus;

pub const TOPIC_TENANT_PROVISIONED: &str = "iam.create-initial-admin";
pub const TOPIC_USER_LIFECYCLE: &str = "user.lifecycle";
pub const TOPIC_NOTIFICATIONS: &str = "notification.send-password-setup";

/// Identity used in `changed_by` when no user initiated the change.
pub const SYSTEM_ACTOR: &str = "system";
/// Identity used in `changed_by` when the user acted on their own account.
pub const SELF_ACTOR: &str = "self";

/// Inbound: a tenant finished provisioning and needs its first administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantProvisioned {
    pub tenant_id: Uuid,
    pub admin_email: String,
    pub admin_full_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordChangeMethod {
    InitialSetup,
    Invitation,
    Reset,
    Change,
}

/// Everything published on `user.lifecycle`, tagged by `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    UserCreated {
        user_id: Uuid,
        tenant_id: Uuid,
        email: String,
        is_initial_admin: bool,
    },
    UserInvited {
        user_id: Uuid,
        tenant_id: Uuid,
        email: String,
        full_name: String,
    },
    UserUpdated {
        user_id: Uuid,
        tenant_id: Uuid,
    },
    UserDeleted {
        user_id: Uuid,
        tenant_id: Uuid,
    },
    RoleAssigned {
        user_id: Uuid,
        tenant_id: Uuid,
        role_id: Uuid,
    },
    RoleRevoked {
        user_id: Uuid,
        tenant_id: Uuid,
        role_id: Uuid,
    },
    UserStatusChanged {
        user_id: Uuid,
        tenant_id: Uuid,
        old_status: UserStatus,
        new_status: UserStatus,
        changed_by: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    PasswordChanged {
        user_id: Uuid,
        tenant_id: Uuid,
        changed_by: String,
        method: PasswordChangeMethod,
        timestamp: DateTime<Utc>,
    },
    UserLogin {
        user_id: Uuid,
        tenant_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::UserCreated { .. } => "user_created",
            LifecycleEvent::UserInvited { .. } => "user_invited",
            LifecycleEvent::UserUpdated { .. } => "user_updated",
            LifecycleEvent::UserDeleted { .. } => "user_deleted",
            LifecycleEvent::RoleAssigned { .. } => "role_assigned",
            LifecycleEvent::RoleRevoked { .. } => "role_revoked",
            LifecycleEvent::UserStatusChanged { .. } => "user_status_changed",
            LifecycleEvent::PasswordChanged { .. } => "password_changed",
            LifecycleEvent::UserLogin { .. } => "user_login",
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            LifecycleEvent::UserCreated { user_id, .. }
            | LifecycleEvent::UserInvited { user_id, .. }
            | LifecycleEvent::UserUpdated { user_id, .. }
            | LifecycleEvent::UserDeleted { user_id, .. }
            | LifecycleEvent::RoleAssigned { user_id, .. }
            | LifecycleEvent::RoleRevoked { user_id, .. }
            | LifecycleEvent::UserStatusChanged { user_id, .. }
            | LifecycleEvent::PasswordChanged { user_id, .. }
            | LifecycleEvent::UserLogin { user_id, .. } => *user_id,
        }
    }

    /// The status-changed / password-changed pair emitted after a redemption.
    pub fn redemption_pair(
        user_id: Uuid,
        tenant_id: Uuid,
        old_status: UserStatus,
        new_status: UserStatus,
        method: PasswordChangeMethod,
        reason: &str,
    ) -> [LifecycleEvent; 2] {
        let timestamp = Utc::now();
        [
            LifecycleEvent::UserStatusChanged {
                user_id,
                tenant_id,
                old_status,
                new_status,
                changed_by: SELF_ACTOR.to_string(),
                reason: reason.to_string(),
                timestamp,
            },
            LifecycleEvent::PasswordChanged {
                user_id,
                tenant_id,
                changed_by: SELF_ACTOR.to_string(),
                method,
                timestamp,
            },
        ]
    }
}

/// Email request consumed by the external notification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailNotification {
    #[serde(rename = "email")]
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_lifecycle(&self, event: &LifecycleEvent) -> Result<(), anyhow::Error>;
    async fn publish_notification(
        &self,
        notification: &EmailNotification,
    ) -> Result<(), anyhow::Error>;
}

/// Delivers a rendered message to a user's mailbox.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, notification: &EmailNotification) -> Result<(), anyhow::Error>;
}
