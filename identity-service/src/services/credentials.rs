//! Credential and one-time token lifecycle.
//!
//! Owns every transition out of `PENDING_SETUP` / `PENDING_INVITE`: tokens
//! are issued here, delivered through the [`Notifier`], and redeemed here.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::events::{EventPublisher, LifecycleEvent, Notifier, PasswordChangeMethod};
use crate::models::{OneTimeToken, TokenPurpose, User, UserStatus};
use crate::services::messages::{self, MessageKind};
use crate::services::store::{AccountTransition, CredentialStore, RedemptionCommit, UserDirectory};
use crate::services::{ServiceError, TokenCodec};
use crate::utils::{hash_password, Password};

/// Metadata of an issued token. The plaintext only ever leaves in the email.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub user_id: Uuid,
    pub purpose: TokenPurpose,
    pub expires_utc: DateTime<Utc>,
}

/// What the holder of a one-time token is trying to do.
#[derive(Debug, Clone)]
pub enum RedeemIntent {
    /// Initial setup or forgotten-password reset.
    SetPassword(Password),
    AcceptInvitation { full_name: String, password: Password },
    VerifyEmail,
}

impl RedeemIntent {
    fn purpose(&self) -> TokenPurpose {
        match self {
            RedeemIntent::SetPassword(_) => TokenPurpose::PasswordReset,
            RedeemIntent::AcceptInvitation { .. } => TokenPurpose::Invitation,
            RedeemIntent::VerifyEmail => TokenPurpose::EmailVerification,
        }
    }
}

/// Result of a successful redemption.
#[derive(Debug, Clone)]
pub struct Redemption {
    pub user: User,
    pub previous_status: UserStatus,
}

#[derive(Clone)]
pub struct CredentialLifecycle {
    users: Arc<dyn UserDirectory>,
    credentials: Arc<dyn CredentialStore>,
    publisher: Arc<dyn EventPublisher>,
    notifier: Arc<dyn Notifier>,
    codec: TokenCodec,
    config: TokenConfig,
}

impl CredentialLifecycle {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        credentials: Arc<dyn CredentialStore>,
        publisher: Arc<dyn EventPublisher>,
        notifier: Arc<dyn Notifier>,
        config: TokenConfig,
    ) -> Self {
        Self {
            users,
            credentials,
            publisher,
            notifier,
            codec: TokenCodec::new(),
            config,
        }
    }

    pub fn ttl_for(&self, kind: MessageKind) -> Duration {
        match kind {
            MessageKind::PasswordSetup => Duration::hours(self.config.setup_ttl_hours),
            MessageKind::Invitation => Duration::hours(self.config.invitation_ttl_hours),
            MessageKind::PasswordReset => Duration::minutes(self.config.reset_ttl_minutes),
            MessageKind::EmailVerification => {
                Duration::hours(self.config.email_verification_ttl_hours)
            }
        }
    }

    /// Looks the user up and issues a token of the given kind.
    pub async fn issue_setup_token(
        &self,
        user_id: Uuid,
        kind: MessageKind,
    ) -> Result<IssuedToken, ServiceError> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        self.issue_token(&user, kind).await
    }

    /// Persists a fresh token digest, then emails the plaintext.
    ///
    /// Nothing is sent if persisting fails. A delivery failure is reported
    /// as `Notification` but the stored token stays redeemable.
    #[instrument(skip(self, user), fields(user_id = %user.user_id, kind = ?kind))]
    pub async fn issue_token(
        &self,
        user: &User,
        kind: MessageKind,
    ) -> Result<IssuedToken, ServiceError> {
        let ttl = self.ttl_for(kind);
        let generated = self.codec.generate()?;
        let token = OneTimeToken::new(generated.digest, user.user_id, kind.purpose(), ttl);

        self.credentials.create_token(&token).await?;

        let message = messages::render(
            kind,
            &user.email,
            &self.config.app_base_url,
            &generated.plaintext,
            ttl,
        );

        self.notifier.send_email(&message).await.map_err(|e| {
            tracing::error!(error = %e, "Token persisted but notification failed");
            ServiceError::Notification(e)
        })?;

        tracing::info!(expires_utc = %token.expires_utc, "One-time token issued");

        Ok(IssuedToken {
            user_id: user.user_id,
            purpose: token.purpose,
            expires_utc: token.expires_utc,
        })
    }

    /// Consumes a one-time token and applies its account transition.
    #[instrument(skip_all, fields(purpose = ?intent.purpose()))]
    pub async fn redeem(
        &self,
        plaintext: &str,
        intent: RedeemIntent,
    ) -> Result<Redemption, ServiceError> {
        let digest = self.codec.digest(plaintext)?;

        let token = self
            .credentials
            .get_token(&digest)
            .await?
            .ok_or(ServiceError::TokenInvalid)?;

        if token.is_expired() {
            return Err(ServiceError::TokenExpired);
        }

        if token.purpose != intent.purpose() {
            tracing::warn!(stored = ?token.purpose, "Token presented for the wrong flow");
            return Err(ServiceError::TokenInvalid);
        }

        let user = self
            .users
            .get_user(token.user_id)
            .await?
            .ok_or(ServiceError::TokenInvalid)?;

        if user.status == UserStatus::Suspended {
            return Err(ServiceError::PermissionDenied("Account is suspended".to_string()));
        }

        let (password_hash, transition) = match &intent {
            RedeemIntent::SetPassword(password) => {
                (Some(hash(password)?), AccountTransition::Activate)
            }
            RedeemIntent::AcceptInvitation {
                full_name,
                password,
            } => {
                if user.status != UserStatus::PendingInvite {
                    return Err(ServiceError::TokenInvalid);
                }
                (
                    Some(hash(password)?),
                    AccountTransition::ActivateInvited {
                        full_name: full_name.clone(),
                    },
                )
            }
            RedeemIntent::VerifyEmail => (None, AccountTransition::MarkEmailVerified),
        };

        let updated = self
            .credentials
            .commit_redemption(&RedemptionCommit {
                digest,
                user_id: user.user_id,
                password_hash,
                transition,
            })
            .await?;

        tracing::info!(user_id = %updated.user_id, status = %updated.status, "Token redeemed");

        self.publish_redemption(&user, &updated, &intent).await?;

        Ok(Redemption {
            user: updated,
            previous_status: user.status,
        })
    }

    async fn publish_redemption(
        &self,
        before: &User,
        after: &User,
        intent: &RedeemIntent,
    ) -> Result<(), ServiceError> {
        let events = match intent {
            RedeemIntent::VerifyEmail => vec![LifecycleEvent::UserUpdated {
                user_id: after.user_id,
                tenant_id: after.tenant_id,
            }],
            _ => {
                let (method, reason) = match before.status {
                    UserStatus::PendingSetup => {
                        (PasswordChangeMethod::InitialSetup, "Initial password set")
                    }
                    UserStatus::PendingInvite => {
                        (PasswordChangeMethod::Invitation, "Invitation accepted")
                    }
                    _ => (PasswordChangeMethod::Reset, "Password reset"),
                };
                let [status_changed, password_changed] = LifecycleEvent::redemption_pair(
                    after.user_id,
                    after.tenant_id,
                    before.status,
                    after.status,
                    method,
                    reason,
                );
                if before.status == after.status {
                    vec![password_changed]
                } else {
                    vec![status_changed, password_changed]
                }
            }
        };

        for event in &events {
            self.publisher
                .publish_lifecycle(event)
                .await
                .map_err(ServiceError::EventPublish)?;
        }
        Ok(())
    }

    /// Bulk revocation of every outstanding one-time token of a user.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let removed = self.credentials.delete_user_tokens(user_id).await?;
        tracing::info!(user_id = %user_id, removed, "Revoked one-time tokens");
        Ok(removed)
    }

    /// Garbage-collects expired token rows.
    pub async fn purge_expired(&self) -> Result<u64, ServiceError> {
        self.credentials.delete_expired_tokens(Utc::now()).await
    }
}

fn hash(password: &Password) -> Result<String, ServiceError> {
    hash_password(password)
        .map(|h| h.into_string())
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e)))
}
