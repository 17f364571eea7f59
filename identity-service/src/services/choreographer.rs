//! Tenant onboarding, driven by inbound events.
//!
//! `AwaitingProvisionEvent -> AdminCreated -> TokenIssued -> Redeemed`.
//! Every handler tolerates redelivery: the user's status and the
//! `is_initial_admin` flag are the idempotency guards.

use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

use crate::events::{EventPublisher, LifecycleEvent, TenantProvisioned};
use crate::models::UserStatus;
use crate::services::credentials::CredentialLifecycle;
use crate::services::messages::MessageKind;
use crate::services::store::UserDirectory;
use crate::services::users::UserService;
use crate::services::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStage {
    AwaitingProvisionEvent,
    AdminCreated,
    TokenIssued,
    Redeemed,
}

impl OnboardingStage {
    /// Stage implied by an existing account that no longer needs a token.
    fn of_status(status: UserStatus) -> Self {
        match status {
            UserStatus::Active => OnboardingStage::Redeemed,
            _ => OnboardingStage::AdminCreated,
        }
    }
}

#[derive(Clone)]
pub struct Choreographer {
    users: Arc<dyn UserDirectory>,
    user_service: UserService,
    lifecycle: Arc<CredentialLifecycle>,
    publisher: Arc<dyn EventPublisher>,
}

impl Choreographer {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        user_service: UserService,
        lifecycle: Arc<CredentialLifecycle>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            users,
            user_service,
            lifecycle,
            publisher,
        }
    }

    /// Creates the tenant's first administrator.
    ///
    /// A redelivered event for an admin still in `PENDING_SETUP` repairs the
    /// role assignment and re-announces `user_created`; any other existing
    /// account is left alone.
    #[instrument(skip(self, event), fields(tenant_id = %event.tenant_id))]
    pub async fn handle_tenant_provisioned(
        &self,
        event: &TenantProvisioned,
    ) -> Result<OnboardingStage, ServiceError> {
        let email = event.admin_email.trim();
        if email.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "admin_email must not be empty".to_string(),
            ));
        }

        let existing = self.users.get_user_by_email(event.tenant_id, email).await?;

        let Some(user) = existing else {
            let user = self
                .user_service
                .create_initial_admin(event.tenant_id, email, &event.admin_full_name)
                .await?;
            tracing::info!(user_id = %user.user_id, "Tenant admin created");
            return Ok(OnboardingStage::AdminCreated);
        };

        if user.status != UserStatus::PendingSetup {
            tracing::info!(
                user_id = %user.user_id,
                status = %user.status,
                "Tenant admin already onboarded, skipping"
            );
            return Ok(OnboardingStage::of_status(user.status));
        }

        self.user_service.grant_tenant_admin(&user).await?;

        self.publisher
            .publish_lifecycle(&LifecycleEvent::UserCreated {
                user_id: user.user_id,
                tenant_id: user.tenant_id,
                email: user.email.clone(),
                is_initial_admin: true,
            })
            .await
            .map_err(ServiceError::EventPublish)?;

        tracing::info!(user_id = %user.user_id, "Tenant admin pending setup, re-announced");
        Ok(OnboardingStage::AdminCreated)
    }

    /// Issues setup or invitation tokens for freshly created accounts.
    ///
    /// Returns `None` for events that do not drive onboarding.
    #[instrument(skip(self, event), fields(event_type = event.event_type(), user_id = %event.user_id()))]
    pub async fn handle_lifecycle_event(
        &self,
        event: &LifecycleEvent,
    ) -> Result<Option<OnboardingStage>, ServiceError> {
        let kind = match event {
            LifecycleEvent::UserCreated {
                is_initial_admin: true,
                ..
            } => MessageKind::PasswordSetup,
            LifecycleEvent::UserInvited { .. } => MessageKind::Invitation,
            _ => return Ok(None),
        };

        let Some(user) = self.users.get_user(event.user_id()).await? else {
            tracing::warn!("User no longer exists, skipping token issuance");
            return Ok(None);
        };

        if !user.status.is_pending() {
            tracing::info!(status = %user.status, "User no longer pending, skipping token issuance");
            return Ok(Some(OnboardingStage::of_status(user.status)));
        }

        self.lifecycle.issue_token(&user, kind).await?;
        Ok(Some(OnboardingStage::TokenIssued))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{InMemoryPublisher, RecordingNotifier};
    use crate::models::TENANT_ADMIN_ROLE;
    use crate::services::credentials::RedeemIntent;
    use crate::services::store::{InMemoryStore, RoleDirectory};
    use crate::utils::Password;
    use uuid::Uuid;

    struct Harness {
        store: Arc<InMemoryStore>,
        publisher: Arc<InMemoryPublisher>,
        notifier: Arc<RecordingNotifier>,
        lifecycle: Arc<CredentialLifecycle>,
        choreographer: Choreographer,
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
        let user_service = UserService::new(store.clone(), store.clone(), publisher.clone());
        let choreographer =
            Choreographer::new(store.clone(), user_service, lifecycle.clone(), publisher.clone());
        Harness {
            store,
            publisher,
            notifier,
            lifecycle,
            choreographer,
        }
    }

    fn provisioned(tenant_id: Uuid) -> TenantProvisioned {
        TenantProvisioned {
            tenant_id,
            admin_email: "a@x.com".to_string(),
            admin_full_name: "A".to_string(),
        }
    }

    fn plaintext_from(body: &str) -> String {
        let encoded = body
            .split("token=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap();
        urlencoding::decode(encoded).unwrap().into_owned()
    }

    #[tokio::test]
    async fn provisioning_creates_pending_admin_with_role() -> Result<(), anyhow::Error> {
        let h = harness();
        let tenant_id = Uuid::new_v4();

        let stage = h
            .choreographer
            .handle_tenant_provisioned(&provisioned(tenant_id))
            .await?;
        assert_eq!(stage, OnboardingStage::AdminCreated);

        let user = h
            .store
            .get_user_by_email(tenant_id, "a@x.com")
            .await?
            .unwrap();
        assert_eq!(user.status, UserStatus::PendingSetup);

        let role = h
            .store
            .get_role_by_name(tenant_id, TENANT_ADMIN_ROLE)
            .await?
            .unwrap();
        for perm in ["users:create", "users:read", "users:update", "users:delete"] {
            assert!(role.permissions.iter().any(|p| p == perm));
        }

        assert_eq!(
            h.publisher.lifecycle_events(),
            vec![LifecycleEvent::UserCreated {
                user_id: user.user_id,
                tenant_id,
                email: "a@x.com".to_string(),
                is_initial_admin: true,
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn redelivered_provisioning_does_not_duplicate() -> Result<(), anyhow::Error> {
        let h = harness();
        let tenant_id = Uuid::new_v4();
        let event = provisioned(tenant_id);

        h.choreographer.handle_tenant_provisioned(&event).await?;
        h.choreographer.handle_tenant_provisioned(&event).await?;

        assert_eq!(h.store.list_roles(tenant_id).await?.len(), 1);
        let events = h.publisher.lifecycle_events();
        let created: Vec<_> = events
            .iter()
            .filter(|e| e.event_type() == "user_created")
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].user_id(), created[1].user_id());
        Ok(())
    }

    #[tokio::test]
    async fn full_onboarding_flow_reaches_redeemed() -> Result<(), anyhow::Error> {
        let h = harness();
        let tenant_id = Uuid::new_v4();
        h.choreographer
            .handle_tenant_provisioned(&provisioned(tenant_id))
            .await?;

        let created = h.publisher.drain_lifecycle().remove(0);
        let stage = h.choreographer.handle_lifecycle_event(&created).await?;
        assert_eq!(stage, Some(OnboardingStage::TokenIssued));

        let email = h.notifier.last_to("a@x.com").unwrap();
        assert_eq!(email.subject, MessageKind::PasswordSetup.subject());

        let redemption = h
            .lifecycle
            .redeem(
                &plaintext_from(&email.body),
                RedeemIntent::SetPassword(Password::new("Secret123")),
            )
            .await?;
        assert_eq!(redemption.user.status, UserStatus::Active);

        // Redelivery after redemption is a no-op.
        let stage = h.choreographer.handle_lifecycle_event(&created).await?;
        assert_eq!(stage, Some(OnboardingStage::Redeemed));
        assert_eq!(h.notifier.sent().len(), 1);

        let stage = h
            .choreographer
            .handle_tenant_provisioned(&provisioned(tenant_id))
            .await?;
        assert_eq!(stage, OnboardingStage::Redeemed);
        Ok(())
    }

    #[tokio::test]
    async fn non_admin_user_created_is_ignored() -> Result<(), anyhow::Error> {
        let h = harness();
        let event = LifecycleEvent::UserCreated {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            email: "b@x.com".to_string(),
            is_initial_admin: false,
        };

        assert_eq!(h.choreographer.handle_lifecycle_event(&event).await?, None);
        assert!(h.notifier.sent().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn invited_user_gets_invitation_email() -> Result<(), anyhow::Error> {
        let h = harness();
        let tenant_id = Uuid::new_v4();
        let service = UserService::new(h.store.clone(), h.store.clone(), h.publisher.clone());
        service.invite_user(tenant_id, "b@x.com", "B", &[]).await?;

        let invited = h.publisher.drain_lifecycle().remove(0);
        let stage = h.choreographer.handle_lifecycle_event(&invited).await?;
        assert_eq!(stage, Some(OnboardingStage::TokenIssued));

        let email = h.notifier.last_to("b@x.com").unwrap();
        assert_eq!(email.subject, MessageKind::Invitation.subject());
        assert!(email.body.contains("/auth/accept-invite?token="));
        Ok(())
    }
}
