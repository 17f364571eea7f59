use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::models::role::{is_tenant_grantable, is_valid_permission};
use crate::models::Role;
use crate::services::store::RoleDirectory;
use crate::services::ServiceError;

#[derive(Debug, Clone, Default)]
pub struct RoleChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<Vec<String>>,
}

/// Tenant-scoped role management.
#[derive(Clone)]
pub struct RoleService {
    roles: Arc<dyn RoleDirectory>,
}

fn check_permissions(permissions: &[String]) -> Result<(), ServiceError> {
    if let Some(bad) = permissions.iter().find(|p| !is_valid_permission(p)) {
        return Err(ServiceError::InvalidArgument(format!(
            "Invalid permission format: {}",
            bad
        )));
    }
    match permissions.iter().find(|p| !is_tenant_grantable(p)) {
        Some(bad) => Err(ServiceError::PermissionDenied(format!(
            "Permission {} cannot be granted by a tenant role",
            bad
        ))),
        None => Ok(()),
    }
}

fn dedup(mut permissions: Vec<String>) -> Vec<String> {
    permissions.sort();
    permissions.dedup();
    permissions
}

impl RoleService {
    pub fn new(roles: Arc<dyn RoleDirectory>) -> Self {
        Self { roles }
    }

    #[instrument(skip(self, description, permissions))]
    pub async fn create_role(
        &self,
        tenant_id: Uuid,
        name: &str,
        description: &str,
        permissions: Vec<String>,
    ) -> Result<Role, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "Role name must not be empty".to_string(),
            ));
        }
        check_permissions(&permissions)?;

        let role = Role::new(
            tenant_id,
            name.to_string(),
            description.to_string(),
            dedup(permissions),
        );
        self.roles.create_role(&role).await?;

        tracing::info!(role_id = %role.role_id, "Role created");
        Ok(role)
    }

    pub async fn get_role(&self, tenant_id: Uuid, role_id: Uuid) -> Result<Role, ServiceError> {
        self.roles
            .get_role(role_id)
            .await?
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or(ServiceError::RoleNotFound)
    }

    pub async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        self.roles.list_roles(tenant_id).await
    }

    pub async fn update_role(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        changes: RoleChanges,
    ) -> Result<Role, ServiceError> {
        let mut role = self.get_role(tenant_id, role_id).await?;

        if let Some(name) = changes.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(ServiceError::InvalidArgument(
                    "Role name must not be empty".to_string(),
                ));
            }
            role.name = name.to_string();
        }
        if let Some(description) = changes.description {
            role.description = description;
        }
        if let Some(permissions) = changes.permissions {
            check_permissions(&permissions)?;
            role.permissions = dedup(permissions);
        }
        role.updated_utc = Utc::now();

        self.roles.update_role(&role).await?;
        Ok(role)
    }

    /// Deleting a role also drops every assignment of it.
    pub async fn delete_role(&self, tenant_id: Uuid, role_id: Uuid) -> Result<(), ServiceError> {
        self.get_role(tenant_id, role_id).await?;
        self.roles.delete_role(role_id).await?;
        tracing::info!(role_id = %role_id, "Role deleted");
        Ok(())
    }
}
