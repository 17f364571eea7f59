use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::events::{EventPublisher, LifecycleEvent, PasswordChangeMethod, SELF_ACTOR};
use crate::models::{Credential, User, UserStatus};
use crate::services::credentials::{CredentialLifecycle, RedeemIntent};
use crate::services::messages::MessageKind;
use crate::services::store::{CredentialStore, UserDirectory};
use crate::services::{ServiceError, SessionClaims, SessionIssuer, TokenResponse};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

/// Session pair plus the authenticated account.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: TokenResponse,
    pub user: User,
}

/// Password authentication and the synchronous halves of the token flows.
#[derive(Clone)]
pub struct AuthnService {
    users: Arc<dyn UserDirectory>,
    credentials: Arc<dyn CredentialStore>,
    lifecycle: Arc<CredentialLifecycle>,
    sessions: Arc<SessionIssuer>,
    publisher: Arc<dyn EventPublisher>,
}

pub(crate) fn parse_tenant(tenant_identifier: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(tenant_identifier.trim())
        .map_err(|_| ServiceError::InvalidArgument("Invalid tenant identifier".to_string()))
}

impl AuthnService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        credentials: Arc<dyn CredentialStore>,
        lifecycle: Arc<CredentialLifecycle>,
        sessions: Arc<SessionIssuer>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            users,
            credentials,
            lifecycle,
            sessions,
            publisher,
        }
    }

    #[instrument(skip(self, password), fields(tenant = %tenant_identifier))]
    pub async fn login(
        &self,
        email: &str,
        password: &Password,
        tenant_identifier: &str,
    ) -> Result<LoginOutcome, ServiceError> {
        let tenant_id = parse_tenant(tenant_identifier)?;

        let user = self
            .users
            .get_user_by_email(tenant_id, email)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        // Status gate comes before any password work.
        if !user.is_active() {
            tracing::info!(user_id = %user.user_id, status = %user.status, "Login refused for inactive account");
            return Err(ServiceError::AccountNotActive);
        }

        self.check_password(user.user_id, password).await?;

        let tokens = self.start_session(&user).await?;

        if let Err(e) = self
            .publisher
            .publish_lifecycle(&LifecycleEvent::UserLogin {
                user_id: user.user_id,
                tenant_id: user.tenant_id,
                timestamp: Utc::now(),
            })
            .await
        {
            tracing::warn!(error = %e, "Failed to publish login event");
        }

        tracing::info!(user_id = %user.user_id, "User logged in");
        Ok(LoginOutcome { tokens, user })
    }

    async fn check_password(&self, user_id: Uuid, password: &Password) -> Result<(), ServiceError> {
        let credential = self
            .credentials
            .get_credential(user_id)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        let matches = verify_password(password, &PasswordHashString::new(credential.password_hash))
            .map_err(|e| ServiceError::Internal(e.context("Stored password hash is unreadable")))?;

        if !matches {
            return Err(ServiceError::InvalidCredentials);
        }
        Ok(())
    }

    async fn start_session(&self, user: &User) -> Result<TokenResponse, ServiceError> {
        let tokens = self
            .sessions
            .issue_pair(user.user_id, user.tenant_id, &user.email)?;

        if let Err(e) = self.users.update_last_login(user.user_id, Utc::now()).await {
            tracing::warn!(error = %e, user_id = %user.user_id, "Failed to update last login");
        }
        Ok(tokens)
    }

    /// First password for a `PENDING_SETUP` account.
    pub async fn set_initial_password(
        &self,
        setup_token: &str,
        new_password: Password,
    ) -> Result<(), ServiceError> {
        self.lifecycle
            .redeem(setup_token, RedeemIntent::SetPassword(new_password))
            .await?;
        Ok(())
    }

    /// Accepts an invitation and logs the new user in.
    pub async fn register_invited_user(
        &self,
        invitation_token: &str,
        full_name: &str,
        password: Password,
    ) -> Result<LoginOutcome, ServiceError> {
        let redemption = self
            .lifecycle
            .redeem(
                invitation_token,
                RedeemIntent::AcceptInvitation {
                    full_name: full_name.trim().to_string(),
                    password,
                },
            )
            .await?;

        let tokens = self.start_session(&redemption.user).await?;
        Ok(LoginOutcome {
            tokens,
            user: redemption.user,
        })
    }

    pub fn refresh_token(&self, refresh_token: &str) -> Result<String, ServiceError> {
        self.sessions.refresh(refresh_token)
    }

    pub fn validate_token(&self, token: &str) -> Result<SessionClaims, ServiceError> {
        self.sessions.validate_access(token)
    }

    /// Always succeeds for a well-formed tenant, whether or not the account exists.
    #[instrument(skip(self, email), fields(tenant = %tenant_identifier))]
    pub async fn forgot_password(
        &self,
        email: &str,
        tenant_identifier: &str,
    ) -> Result<(), ServiceError> {
        let tenant_id = parse_tenant(tenant_identifier)?;

        let Some(user) = self.users.get_user_by_email(tenant_id, email).await? else {
            tracing::debug!("Password reset requested for unknown account");
            return Ok(());
        };

        if matches!(user.status, UserStatus::Suspended | UserStatus::PendingInvite) {
            tracing::info!(user_id = %user.user_id, status = %user.status, "Password reset skipped");
            return Ok(());
        }

        if let Err(e) = self
            .lifecycle
            .issue_token(&user, MessageKind::PasswordReset)
            .await
        {
            tracing::error!(error = %e, user_id = %user.user_id, "Failed to issue password reset token");
        }
        Ok(())
    }

    pub async fn reset_password(
        &self,
        reset_token: &str,
        new_password: Password,
    ) -> Result<(), ServiceError> {
        self.lifecycle
            .redeem(reset_token, RedeemIntent::SetPassword(new_password))
            .await?;
        Ok(())
    }

    pub async fn verify_email(&self, token: &str) -> Result<User, ServiceError> {
        Ok(self
            .lifecycle
            .redeem(token, RedeemIntent::VerifyEmail)
            .await?
            .user)
    }

    /// Sends a verification link unless the address is already verified.
    pub async fn request_email_verification(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        if user.email_verified {
            return Ok(());
        }

        self.lifecycle
            .issue_token(&user, MessageKind::EmailVerification)
            .await?;
        Ok(())
    }

    /// Revokes every outstanding one-time token. Session tokens expire on their own.
    pub async fn logout(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.lifecycle.revoke_all(user_id).await?;
        Ok(())
    }

    #[instrument(skip(self, current, new_password))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current: &Password,
        new_password: &Password,
    ) -> Result<(), ServiceError> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        if !user.is_active() {
            return Err(ServiceError::AccountNotActive);
        }

        self.check_password(user_id, current).await?;

        let hash = hash_password(new_password)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e)))?;
        self.credentials
            .update_credential(&Credential::new(user_id, hash.into_string()))
            .await?;

        tracing::info!(user_id = %user_id, "Password changed");

        self.publisher
            .publish_lifecycle(&LifecycleEvent::PasswordChanged {
                user_id,
                tenant_id: user.tenant_id,
                changed_by: SELF_ACTOR.to_string(),
                method: PasswordChangeMethod::Change,
                timestamp: Utc::now(),
            })
            .await
            .map_err(ServiceError::EventPublish)
    }

    /// Re-authentication check before sensitive operations.
    pub async fn confirm_password(
        &self,
        user_id: Uuid,
        password: &Password,
    ) -> Result<(), ServiceError> {
        self.check_password(user_id, password).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{InMemoryPublisher, RecordingNotifier};
    use crate::services::store::InMemoryStore;
    use chrono::Duration;

    struct Harness {
        store: Arc<InMemoryStore>,
        notifier: Arc<RecordingNotifier>,
        authn: AuthnService,
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
        let sessions = Arc::new(SessionIssuer::from_secret(
            b"unit-test-secret-unit-test-secret!!",
            Duration::minutes(15),
            Duration::hours(24),
        ));
        let authn = AuthnService::new(store.clone(), store.clone(), lifecycle, sessions, publisher);
        Harness {
            store,
            notifier,
            authn,
        }
    }

    async fn user_with_password(h: &Harness, status: UserStatus, password: &str) -> User {
        let user = User::new(
            Uuid::new_v4(),
            "a@x.com".to_string(),
            "A".to_string(),
            status,
        );
        h.store.create_user(&user).await.unwrap();
        let hash = hash_password(&Password::new(password)).unwrap();
        h.store
            .create_credential(&Credential::new(user.user_id, hash.into_string()))
            .await
            .unwrap();
        user
    }

    #[tokio::test]
    async fn login_issues_session_for_active_user() {
        let h = harness();
        let user = user_with_password(&h, UserStatus::Active, "Secret123").await;

        let outcome = h
            .authn
            .login("A@X.com", &Password::new("Secret123"), &user.tenant_id.to_string())
            .await
            .unwrap();

        let claims = h.authn.validate_token(&outcome.tokens.access_token).unwrap();
        assert_eq!(claims.user_id, user.user_id);
        let stored = h.store.get_user(user.user_id).await.unwrap().unwrap();
        assert!(stored.last_login_utc.is_some());
    }

    #[tokio::test]
    async fn login_rejects_inactive_accounts_even_with_right_password() {
        let h = harness();
        for status in [
            UserStatus::Suspended,
            UserStatus::PendingSetup,
            UserStatus::PendingInvite,
        ] {
            let user = User::new(
                Uuid::new_v4(),
                "a@x.com".to_string(),
                "A".to_string(),
                status,
            );
            h.store.create_user(&user).await.unwrap();
            // No credential at all: the status check must fire first.
            let result = h
                .authn
                .login("a@x.com", &Password::new("Secret123"), &user.tenant_id.to_string())
                .await;
            assert!(matches!(result, Err(ServiceError::AccountNotActive)));
        }
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_invalid_credentials() {
        let h = harness();
        let user = user_with_password(&h, UserStatus::Active, "Secret123").await;
        let result = h
            .authn
            .login("a@x.com", &Password::new("nope"), &user.tenant_id.to_string())
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn login_with_bad_tenant_is_invalid_argument() {
        let h = harness();
        let result = h
            .authn
            .login("a@x.com", &Password::new("x"), "not-a-uuid")
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn forgot_password_does_not_reveal_unknown_accounts() {
        let h = harness();
        h.authn
            .forgot_password("ghost@x.com", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn change_password_requires_current_password() {
        let h = harness();
        let user = user_with_password(&h, UserStatus::Active, "Secret123").await;

        let wrong = h
            .authn
            .change_password(user.user_id, &Password::new("bad"), &Password::new("Next1234"))
            .await;
        assert!(matches!(wrong, Err(ServiceError::InvalidCredentials)));

        h.authn
            .change_password(user.user_id, &Password::new("Secret123"), &Password::new("Next1234"))
            .await
            .unwrap();
        h.authn
            .confirm_password(user.user_id, &Password::new("Next1234"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn logout_revokes_outstanding_tokens() {
        let h = harness();
        let user = user_with_password(&h, UserStatus::Active, "Secret123").await;
        h.authn
            .forgot_password("a@x.com", &user.tenant_id.to_string())
            .await
            .unwrap();
        assert_eq!(h.store.token_count(), 1);

        h.authn.logout(user.user_id).await.unwrap();
        assert_eq!(h.store.token_count(), 0);
    }
}
