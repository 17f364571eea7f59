//! Persistence seams: user and role directories plus the credential store.
//!
//! All durable state lives behind these traits; services hold them as
//! `Arc<dyn _>` and never cache entities in process.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Credential, OneTimeToken, Role, User, UserStatus};
use crate::services::{ServiceError, TokenDigest};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fails with `EmailAlreadyRegistered` when the tenant already has the email.
    async fn create_user(&self, user: &User) -> Result<(), ServiceError>;
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, ServiceError>;
    async fn get_user_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, ServiceError>;
    async fn list_users(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, ServiceError>;
    /// Persists `full_name`, `email` and `email_verified`.
    async fn update_user(&self, user: &User) -> Result<(), ServiceError>;
    async fn update_user_status(&self, user_id: Uuid, status: UserStatus)
        -> Result<(), ServiceError>;
    async fn update_last_login(&self, user_id: Uuid, at: DateTime<Utc>)
        -> Result<(), ServiceError>;
    /// Removes the user together with credential, tokens and role assignments.
    async fn delete_user(&self, user_id: Uuid) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// Fails with `RoleAlreadyExists` when the tenant already has the name.
    async fn create_role(&self, role: &Role) -> Result<(), ServiceError>;
    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, ServiceError>;
    async fn get_role_by_name(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Option<Role>, ServiceError>;
    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>, ServiceError>;
    async fn update_role(&self, role: &Role) -> Result<(), ServiceError>;
    async fn delete_role(&self, role_id: Uuid) -> Result<(), ServiceError>;
    /// Idempotent: assigning an already held role is a no-op.
    async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<(), ServiceError>;
    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), ServiceError>;
    async fn list_user_roles(&self, user_id: Uuid) -> Result<Vec<Role>, ServiceError>;
}

/// Account change applied in the same unit of work as a token redemption.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountTransition {
    /// `PENDING_SETUP` (or a reset on an `ACTIVE` account) becomes `ACTIVE`.
    Activate,
    /// `PENDING_INVITE` becomes `ACTIVE` under the supplied display name.
    ActivateInvited { full_name: String },
    MarkEmailVerified,
}

impl AccountTransition {
    /// Checks the account's status as seen inside the redemption's unit of
    /// work. A suspension that landed after the service-level check still
    /// wins here.
    pub fn check_from(&self, status: UserStatus) -> Result<(), ServiceError> {
        if status == UserStatus::Suspended {
            return Err(ServiceError::PermissionDenied(
                "Account is suspended".to_string(),
            ));
        }
        let allowed = match self {
            AccountTransition::Activate => {
                matches!(status, UserStatus::PendingSetup | UserStatus::Active)
            }
            AccountTransition::ActivateInvited { .. } => status == UserStatus::PendingInvite,
            AccountTransition::MarkEmailVerified => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(ServiceError::TokenInvalid)
        }
    }
}

/// Everything a redemption persists, committed atomically.
#[derive(Debug, Clone)]
pub struct RedemptionCommit {
    pub digest: TokenDigest,
    pub user_id: Uuid,
    pub password_hash: Option<String>,
    pub transition: AccountTransition,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_credential(&self, credential: &Credential) -> Result<(), ServiceError>;
    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>, ServiceError>;
    async fn update_credential(&self, credential: &Credential) -> Result<(), ServiceError>;
    async fn delete_credential(&self, user_id: Uuid) -> Result<(), ServiceError>;

    /// Fails with `TokenCollision` if the digest is already stored; never overwrites.
    async fn create_token(&self, token: &OneTimeToken) -> Result<(), ServiceError>;
    async fn get_token(&self, digest: &TokenDigest) -> Result<Option<OneTimeToken>, ServiceError>;
    /// Returns whether a row was removed.
    async fn delete_token(&self, digest: &TokenDigest) -> Result<bool, ServiceError>;
    async fn delete_user_tokens(&self, user_id: Uuid) -> Result<u64, ServiceError>;
    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, ServiceError>;

    /// Consumes the token, stores the credential and applies the transition
    /// as one unit. Fails with `TokenInvalid`, changing nothing, when the
    /// token was already consumed. Returns the updated user.
    async fn commit_redemption(&self, commit: &RedemptionCommit) -> Result<User, ServiceError>;
}
