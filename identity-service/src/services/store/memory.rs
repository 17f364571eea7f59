use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{AccountTransition, CredentialStore, RedemptionCommit, RoleDirectory, UserDirectory};
use crate::models::{Credential, OneTimeToken, Role, User, UserStatus};
use crate::services::{ServiceError, TokenDigest};

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    credentials: HashMap<Uuid, Credential>,
    tokens: HashMap<TokenDigest, OneTimeToken>,
    roles: HashMap<Uuid, Role>,
    assignments: HashSet<(Uuid, Uuid)>,
}

/// Single-process store backing all three persistence traits. One lock
/// guards everything, so a redemption commit is trivially atomic.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, ServiceError> {
        self.state
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("In-memory store mutex poisoned: {}", e)))
    }

    /// Number of stored one-time tokens.
    pub fn token_count(&self) -> usize {
        self.lock().map(|s| s.tokens.len()).unwrap_or(0)
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn create_user(&self, user: &User) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        let duplicate = state.users.values().any(|u| {
            u.tenant_id == user.tenant_id && u.email.eq_ignore_ascii_case(&user.email)
        });
        if duplicate {
            return Err(ServiceError::EmailAlreadyRegistered);
        }
        state.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn get_user_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, ServiceError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.tenant_id == tenant_id && u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, ServiceError> {
        let state = self.lock()?;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| u.tenant_id == tenant_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(users
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_user(&self, user: &User) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        let duplicate = state.users.values().any(|u| {
            u.user_id != user.user_id
                && u.tenant_id == user.tenant_id
                && u.email.eq_ignore_ascii_case(&user.email)
        });
        if duplicate {
            return Err(ServiceError::EmailAlreadyRegistered);
        }
        let existing = state
            .users
            .get_mut(&user.user_id)
            .ok_or(ServiceError::UserNotFound)?;
        existing.full_name = user.full_name.clone();
        existing.email = user.email.clone();
        existing.email_verified = user.email_verified;
        existing.updated_utc = Utc::now();
        Ok(())
    }

    async fn update_user_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(&user_id).ok_or(ServiceError::UserNotFound)?;
        user.status = status;
        user.updated_utc = Utc::now();
        Ok(())
    }

    async fn update_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(&user_id).ok_or(ServiceError::UserNotFound)?;
        user.last_login_utc = Some(at);
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if state.users.remove(&user_id).is_none() {
            return Err(ServiceError::UserNotFound);
        }
        state.credentials.remove(&user_id);
        state.tokens.retain(|_, t| t.user_id != user_id);
        state.assignments.retain(|(u, _)| *u != user_id);
        Ok(())
    }
}

#[async_trait]
impl RoleDirectory for InMemoryStore {
    async fn create_role(&self, role: &Role) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if state
            .roles
            .values()
            .any(|r| r.tenant_id == role.tenant_id && r.name == role.name)
        {
            return Err(ServiceError::RoleAlreadyExists);
        }
        state.roles.insert(role.role_id, role.clone());
        Ok(())
    }

    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, ServiceError> {
        Ok(self.lock()?.roles.get(&role_id).cloned())
    }

    async fn get_role_by_name(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Option<Role>, ServiceError> {
        Ok(self
            .lock()?
            .roles
            .values()
            .find(|r| r.tenant_id == tenant_id && r.name == name)
            .cloned())
    }

    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        let mut roles: Vec<Role> = self
            .lock()?
            .roles
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn update_role(&self, role: &Role) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if state.roles.values().any(|r| {
            r.role_id != role.role_id && r.tenant_id == role.tenant_id && r.name == role.name
        }) {
            return Err(ServiceError::RoleAlreadyExists);
        }
        let existing = state
            .roles
            .get_mut(&role.role_id)
            .ok_or(ServiceError::RoleNotFound)?;
        existing.name = role.name.clone();
        existing.description = role.description.clone();
        existing.permissions = role.permissions.clone();
        existing.updated_utc = Utc::now();
        Ok(())
    }

    async fn delete_role(&self, role_id: Uuid) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if state.roles.remove(&role_id).is_none() {
            return Err(ServiceError::RoleNotFound);
        }
        state.assignments.retain(|(_, r)| *r != role_id);
        Ok(())
    }

    async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        _tenant_id: Uuid,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if !state.users.contains_key(&user_id) {
            return Err(ServiceError::UserNotFound);
        }
        if !state.roles.contains_key(&role_id) {
            return Err(ServiceError::RoleNotFound);
        }
        state.assignments.insert((user_id, role_id));
        Ok(())
    }

    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), ServiceError> {
        self.lock()?.assignments.remove(&(user_id, role_id));
        Ok(())
    }

    async fn list_user_roles(&self, user_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        let state = self.lock()?;
        let mut roles: Vec<Role> = state
            .assignments
            .iter()
            .filter(|(u, _)| *u == user_id)
            .filter_map(|(_, r)| state.roles.get(r).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn create_credential(&self, credential: &Credential) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if state.credentials.contains_key(&credential.user_id) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Credential already exists for user"
            )));
        }
        state
            .credentials
            .insert(credential.user_id, credential.clone());
        Ok(())
    }

    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>, ServiceError> {
        Ok(self.lock()?.credentials.get(&user_id).cloned())
    }

    async fn update_credential(&self, credential: &Credential) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        let existing = state
            .credentials
            .get_mut(&credential.user_id)
            .ok_or(ServiceError::UserNotFound)?;
        existing.password_hash = credential.password_hash.clone();
        existing.updated_utc = Utc::now();
        Ok(())
    }

    async fn delete_credential(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.lock()?.credentials.remove(&user_id);
        Ok(())
    }

    async fn create_token(&self, token: &OneTimeToken) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if state.tokens.contains_key(&token.digest) {
            return Err(ServiceError::TokenCollision);
        }
        state.tokens.insert(token.digest, token.clone());
        Ok(())
    }

    async fn get_token(&self, digest: &TokenDigest) -> Result<Option<OneTimeToken>, ServiceError> {
        Ok(self.lock()?.tokens.get(digest).cloned())
    }

    async fn delete_token(&self, digest: &TokenDigest) -> Result<bool, ServiceError> {
        Ok(self.lock()?.tokens.remove(digest).is_some())
    }

    async fn delete_user_tokens(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let mut state = self.lock()?;
        let before = state.tokens.len();
        state.tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - state.tokens.len()) as u64)
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let mut state = self.lock()?;
        let before = state.tokens.len();
        state.tokens.retain(|_, t| !t.is_expired_at(now));
        Ok((before - state.tokens.len()) as u64)
    }

    async fn commit_redemption(&self, commit: &RedemptionCommit) -> Result<User, ServiceError> {
        let mut state = self.lock()?;

        match state.tokens.get(&commit.digest) {
            Some(token) if token.user_id == commit.user_id => {}
            _ => return Err(ServiceError::TokenInvalid),
        }
        let status = state
            .users
            .get(&commit.user_id)
            .map(|u| u.status)
            .ok_or(ServiceError::UserNotFound)?;
        commit.transition.check_from(status)?;

        let now = Utc::now();
        state.tokens.remove(&commit.digest);

        if let Some(hash) = &commit.password_hash {
            let credential = state
                .credentials
                .entry(commit.user_id)
                .or_insert_with(|| Credential::new(commit.user_id, hash.clone()));
            credential.password_hash = hash.clone();
            credential.updated_utc = now;
        }

        let user = state
            .users
            .get_mut(&commit.user_id)
            .ok_or(ServiceError::UserNotFound)?;
        match &commit.transition {
            AccountTransition::Activate => {
                user.status = UserStatus::Active;
                user.email_verified = true;
            }
            AccountTransition::ActivateInvited { full_name } => {
                user.status = UserStatus::Active;
                user.email_verified = true;
                user.full_name = full_name.clone();
            }
            AccountTransition::MarkEmailVerified => {
                user.email_verified = true;
            }
        }
        user.updated_utc = now;

        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenPurpose;
    use crate::services::TokenCodec;
    use chrono::Duration;

    fn user(tenant_id: Uuid, email: &str) -> User {
        User::new(
            tenant_id,
            email.to_string(),
            "Test".to_string(),
            UserStatus::PendingSetup,
        )
    }

    fn token_for(user_id: Uuid) -> OneTimeToken {
        let generated = TokenCodec::new().generate().unwrap();
        OneTimeToken::new(
            generated.digest,
            user_id,
            TokenPurpose::PasswordReset,
            Duration::hours(1),
        )
    }

    #[tokio::test]
    async fn email_is_unique_per_tenant_only() -> Result<(), anyhow::Error> {
        let store = InMemoryStore::new();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();

        store.create_user(&user(t1, "a@x.com")).await?;
        store.create_user(&user(t2, "a@x.com")).await?;
        assert!(matches!(
            store.create_user(&user(t1, "A@X.com")).await,
            Err(ServiceError::EmailAlreadyRegistered)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn token_digest_collision_is_rejected() -> Result<(), anyhow::Error> {
        let store = InMemoryStore::new();
        let token = token_for(Uuid::new_v4());
        store.create_token(&token).await?;
        assert!(matches!(
            store.create_token(&token).await,
            Err(ServiceError::TokenCollision)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn commit_redemption_consumes_token_once() -> Result<(), anyhow::Error> {
        let store = InMemoryStore::new();
        let u = user(Uuid::new_v4(), "a@x.com");
        store.create_user(&u).await?;
        let token = token_for(u.user_id);
        store.create_token(&token).await?;

        let commit = RedemptionCommit {
            digest: token.digest,
            user_id: u.user_id,
            password_hash: Some("hash".to_string()),
            transition: AccountTransition::Activate,
        };

        let updated = store.commit_redemption(&commit).await?;
        assert_eq!(updated.status, UserStatus::Active);
        assert!(store.get_token(&token.digest).await?.is_none());
        assert_eq!(
            store.get_credential(u.user_id).await?.map(|c| c.password_hash),
            Some("hash".to_string())
        );

        assert!(matches!(
            store.commit_redemption(&commit).await,
            Err(ServiceError::TokenInvalid)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn delete_user_cascades() -> Result<(), anyhow::Error> {
        let store = InMemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let u = user(tenant_id, "a@x.com");
        store.create_user(&u).await?;
        store
            .create_credential(&Credential::new(u.user_id, "hash".to_string()))
            .await?;
        store.create_token(&token_for(u.user_id)).await?;
        let role = Role::tenant_admin(tenant_id);
        store.create_role(&role).await?;
        store.assign_role(u.user_id, role.role_id, tenant_id).await?;

        store.delete_user(u.user_id).await?;

        assert!(store.get_credential(u.user_id).await?.is_none());
        assert_eq!(store.token_count(), 0);
        assert!(store.list_user_roles(u.user_id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn assign_role_is_idempotent() -> Result<(), anyhow::Error> {
        let store = InMemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let u = user(tenant_id, "a@x.com");
        store.create_user(&u).await?;
        let role = Role::tenant_admin(tenant_id);
        store.create_role(&role).await?;

        store.assign_role(u.user_id, role.role_id, tenant_id).await?;
        store.assign_role(u.user_id, role.role_id, tenant_id).await?;

        assert_eq!(store.list_user_roles(u.user_id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn purges_only_expired_tokens() -> Result<(), anyhow::Error> {
        let store = InMemoryStore::new();
        let user_id = Uuid::new_v4();
        let live = token_for(user_id);
        let mut stale = token_for(user_id);
        stale.expires_utc = Utc::now() - Duration::minutes(1);
        store.create_token(&live).await?;
        store.create_token(&stale).await?;

        assert_eq!(store.delete_expired_tokens(Utc::now()).await?, 1);
        assert!(store.get_token(&live.digest).await?.is_some());
        Ok(())
    }
}
