//! Tenant-scoped user administration.
//!
//! Every operation takes the caller's tenant; entities from another tenant
//! are reported as not found.

use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::events::{EventPublisher, LifecycleEvent};
use crate::models::{Role, User, UserStatus, TENANT_ADMIN_ROLE};
use crate::services::store::{RoleDirectory, UserDirectory};
use crate::services::ServiceError;

pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 20;

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserDirectory>,
    roles: Arc<dyn RoleDirectory>,
    publisher: Arc<dyn EventPublisher>,
}

/// Fields an administrator may change; `None` leaves the field alone.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub full_name: Option<String>,
    pub email: Option<String>,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        roles: Arc<dyn RoleDirectory>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            users,
            roles,
            publisher,
        }
    }

    async fn publish(&self, event: LifecycleEvent) -> Result<(), ServiceError> {
        self.publisher
            .publish_lifecycle(&event)
            .await
            .map_err(ServiceError::EventPublish)
    }

    /// Finds the tenant's "Tenant Admin" role, creating it on first use.
    pub async fn ensure_tenant_admin_role(&self, tenant_id: Uuid) -> Result<Role, ServiceError> {
        if let Some(role) = self.roles.get_role_by_name(tenant_id, TENANT_ADMIN_ROLE).await? {
            return Ok(role);
        }

        let role = Role::tenant_admin(tenant_id);
        match self.roles.create_role(&role).await {
            Ok(()) => Ok(role),
            // Lost a race with a concurrent provisioning of the same tenant.
            Err(ServiceError::RoleAlreadyExists) => self
                .roles
                .get_role_by_name(tenant_id, TENANT_ADMIN_ROLE)
                .await?
                .ok_or(ServiceError::RoleNotFound),
            Err(e) => Err(e),
        }
    }

    /// Assigns the tenant's admin role. Re-granting is a no-op.
    pub async fn grant_tenant_admin(&self, user: &User) -> Result<Role, ServiceError> {
        let role = self.ensure_tenant_admin_role(user.tenant_id).await?;
        self.roles
            .assign_role(user.user_id, role.role_id, user.tenant_id)
            .await?;
        Ok(role)
    }

    /// First administrator of a new tenant: `PENDING_SETUP`, holding the
    /// default admin role, announced with `is_initial_admin = true`.
    #[instrument(skip(self, email, full_name))]
    pub async fn create_initial_admin(
        &self,
        tenant_id: Uuid,
        email: &str,
        full_name: &str,
    ) -> Result<User, ServiceError> {
        let user = User::new(
            tenant_id,
            email.trim().to_string(),
            full_name.trim().to_string(),
            UserStatus::PendingSetup,
        );
        self.users.create_user(&user).await?;

        let role = self.grant_tenant_admin(&user).await?;

        tracing::info!(user_id = %user.user_id, role_id = %role.role_id, "Initial admin created");

        self.publish(LifecycleEvent::UserCreated {
            user_id: user.user_id,
            tenant_id,
            email: user.email.clone(),
            is_initial_admin: true,
        })
        .await?;

        Ok(user)
    }

    /// Regular user awaiting a setup link from an administrator flow.
    pub async fn create_user(
        &self,
        tenant_id: Uuid,
        email: &str,
        full_name: &str,
    ) -> Result<User, ServiceError> {
        let user = User::new(
            tenant_id,
            email.trim().to_string(),
            full_name.trim().to_string(),
            UserStatus::PendingSetup,
        );
        self.users.create_user(&user).await?;

        self.publish(LifecycleEvent::UserCreated {
            user_id: user.user_id,
            tenant_id,
            email: user.email.clone(),
            is_initial_admin: false,
        })
        .await?;

        Ok(user)
    }

    #[instrument(skip(self, email, full_name))]
    pub async fn invite_user(
        &self,
        tenant_id: Uuid,
        email: &str,
        full_name: &str,
        role_ids: &[Uuid],
    ) -> Result<User, ServiceError> {
        for role_id in role_ids {
            self.tenant_role(tenant_id, *role_id).await?;
        }

        let user = User::new(
            tenant_id,
            email.trim().to_string(),
            full_name.trim().to_string(),
            UserStatus::PendingInvite,
        );
        self.users.create_user(&user).await?;

        for role_id in role_ids {
            self.roles.assign_role(user.user_id, *role_id, tenant_id).await?;
        }

        tracing::info!(user_id = %user.user_id, roles = role_ids.len(), "User invited");

        self.publish(LifecycleEvent::UserInvited {
            user_id: user.user_id,
            tenant_id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
        })
        .await?;

        Ok(user)
    }

    pub async fn get_user(&self, tenant_id: Uuid, user_id: Uuid) -> Result<User, ServiceError> {
        self.users
            .get_user(user_id)
            .await?
            .filter(|u| u.tenant_id == tenant_id)
            .ok_or(ServiceError::UserNotFound)
    }

    async fn tenant_role(&self, tenant_id: Uuid, role_id: Uuid) -> Result<Role, ServiceError> {
        self.roles
            .get_role(role_id)
            .await?
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or(ServiceError::RoleNotFound)
    }

    pub async fn list_users(
        &self,
        tenant_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<User>, ServiceError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = offset.unwrap_or(0).max(0);
        self.users.list_users(tenant_id, limit, offset).await
    }

    pub async fn update_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        changes: UserChanges,
    ) -> Result<User, ServiceError> {
        let mut user = self.get_user(tenant_id, user_id).await?;

        if let Some(full_name) = changes.full_name {
            user.full_name = full_name.trim().to_string();
        }
        if let Some(email) = changes.email {
            let email = email.trim().to_string();
            if !email.eq_ignore_ascii_case(&user.email) {
                // A new address has to be verified again.
                user.email_verified = false;
            }
            user.email = email;
        }
        user.updated_utc = Utc::now();

        self.users.update_user(&user).await?;

        self.publish(LifecycleEvent::UserUpdated { user_id, tenant_id })
            .await?;

        Ok(user)
    }

    /// Administrative disable. Suspending a suspended user is a no-op.
    #[instrument(skip(self, reason))]
    pub async fn suspend_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        changed_by: Uuid,
        reason: &str,
    ) -> Result<User, ServiceError> {
        let mut user = self.get_user(tenant_id, user_id).await?;
        if user.status == UserStatus::Suspended {
            return Ok(user);
        }

        let old_status = user.status;
        self.users
            .update_user_status(user_id, UserStatus::Suspended)
            .await?;
        user.status = UserStatus::Suspended;

        tracing::info!(user_id = %user_id, old_status = %old_status, "User suspended");

        self.publish(LifecycleEvent::UserStatusChanged {
            user_id,
            tenant_id,
            old_status,
            new_status: UserStatus::Suspended,
            changed_by: changed_by.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        })
        .await?;

        Ok(user)
    }

    /// Removes the user with its credential, tokens and role assignments.
    pub async fn delete_user(&self, tenant_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
        self.get_user(tenant_id, user_id).await?;
        self.users.delete_user(user_id).await?;

        tracing::info!(user_id = %user_id, "User deleted");

        self.publish(LifecycleEvent::UserDeleted { user_id, tenant_id })
            .await
    }

    pub async fn assign_role(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.get_user(tenant_id, user_id).await?;
        self.tenant_role(tenant_id, role_id).await?;
        self.roles.assign_role(user_id, role_id, tenant_id).await?;

        self.publish(LifecycleEvent::RoleAssigned {
            user_id,
            tenant_id,
            role_id,
        })
        .await
    }

    pub async fn revoke_role(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.get_user(tenant_id, user_id).await?;
        self.tenant_role(tenant_id, role_id).await?;
        self.roles.revoke_role(user_id, role_id).await?;

        self.publish(LifecycleEvent::RoleRevoked {
            user_id,
            tenant_id,
            role_id,
        })
        .await
    }

    pub async fn list_user_roles(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Role>, ServiceError> {
        self.get_user(tenant_id, user_id).await?;
        self.roles.list_user_roles(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InMemoryPublisher;
    use crate::services::store::InMemoryStore;

    fn service() -> (UserService, Arc<InMemoryPublisher>) {
        let store = Arc::new(InMemoryStore::new());
        let publisher = Arc::new(InMemoryPublisher::new());
        (
            UserService::new(store.clone(), store, publisher.clone()),
            publisher,
        )
    }

    #[tokio::test]
    async fn initial_admin_gets_default_role_and_event() -> Result<(), anyhow::Error> {
        let (service, publisher) = service();
        let tenant_id = Uuid::new_v4();

        let user = service
            .create_initial_admin(tenant_id, "a@x.com", "A")
            .await?;
        assert_eq!(user.status, UserStatus::PendingSetup);

        let roles = service.list_user_roles(tenant_id, user.user_id).await?;
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, TENANT_ADMIN_ROLE);

        assert_eq!(
            publisher.lifecycle_events(),
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
    async fn duplicate_email_in_tenant_conflicts() -> Result<(), anyhow::Error> {
        let (service, _) = service();
        let tenant_id = Uuid::new_v4();
        service.create_user(tenant_id, "a@x.com", "A").await?;

        assert!(matches!(
            service.create_user(tenant_id, "a@x.com", "B").await,
            Err(ServiceError::EmailAlreadyRegistered)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn invite_with_unknown_role_creates_nothing() -> Result<(), anyhow::Error> {
        let (service, publisher) = service();
        let tenant_id = Uuid::new_v4();

        let result = service
            .invite_user(tenant_id, "b@x.com", "B", &[Uuid::new_v4()])
            .await;
        assert!(matches!(result, Err(ServiceError::RoleNotFound)));
        assert!(service.list_users(tenant_id, None, None).await?.is_empty());
        assert!(publisher.lifecycle_events().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn other_tenants_users_are_invisible() -> Result<(), anyhow::Error> {
        let (service, _) = service();
        let user = service.create_user(Uuid::new_v4(), "a@x.com", "A").await?;

        assert!(matches!(
            service.get_user(Uuid::new_v4(), user.user_id).await,
            Err(ServiceError::UserNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn suspend_publishes_status_change_once() -> Result<(), anyhow::Error> {
        let (service, publisher) = service();
        let tenant_id = Uuid::new_v4();
        let user = service.create_user(tenant_id, "a@x.com", "A").await?;
        publisher.drain_lifecycle();

        let admin = Uuid::new_v4();
        service
            .suspend_user(tenant_id, user.user_id, admin, "policy violation")
            .await?;
        service
            .suspend_user(tenant_id, user.user_id, admin, "again")
            .await?;

        let events = publisher.lifecycle_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            LifecycleEvent::UserStatusChanged {
                old_status: UserStatus::PendingSetup,
                new_status: UserStatus::Suspended,
                ..
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn changing_email_clears_verification() -> Result<(), anyhow::Error> {
        let (service, _) = service();
        let tenant_id = Uuid::new_v4();
        let mut user = service.create_user(tenant_id, "a@x.com", "A").await?;
        user.email_verified = true;
        service.users.update_user(&user).await?;

        let renamed = service
            .update_user(
                tenant_id,
                user.user_id,
                UserChanges {
                    full_name: Some("Alice".to_string()),
                    email: Some("A@X.com".to_string()),
                },
            )
            .await?;
        assert!(renamed.email_verified);

        let moved = service
            .update_user(
                tenant_id,
                user.user_id,
                UserChanges {
                    full_name: None,
                    email: Some("alice@y.com".to_string()),
                },
            )
            .await?;
        assert!(!moved.email_verified);
        assert!(!service.get_user(tenant_id, user.user_id).await?.email_verified);
        Ok(())
    }

    #[tokio::test]
    async fn list_is_clamped_to_page_limit() -> Result<(), anyhow::Error> {
        let (service, _) = service();
        let tenant_id = Uuid::new_v4();
        for i in 0..3 {
            service
                .create_user(tenant_id, &format!("u{}@x.com", i), "U")
                .await?;
        }

        assert_eq!(service.list_users(tenant_id, Some(2), None).await?.len(), 2);
        assert_eq!(service.list_users(tenant_id, Some(0), None).await?.len(), 1);
        assert_eq!(service.list_users(tenant_id, Some(500), Some(1)).await?.len(), 2);
        Ok(())
    }
}
