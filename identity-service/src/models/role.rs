//! Role model - tenant-scoped named sets of `resource:action` permissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub const TENANT_ADMIN_ROLE: &str = "Tenant Admin";
pub const TENANT_ADMIN_DESCRIPTION: &str = "Full administrative access to tenant";

/// Resources the default tenant administrator role covers.
const TENANT_ADMIN_RESOURCES: [&str; 4] = ["users", "roles", "departments", "designations"];
const CRUD_ACTIONS: [&str; 4] = ["create", "read", "update", "delete"];

/// Resources above tenant scope. Roles created by a tenant never grant them.
const PLATFORM_RESOURCES: [&str; 1] = ["tenants"];

/// Role entity (tenant-scoped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Role {
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: String,
    pub permissions: Vec<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(tenant_id: Uuid, name: String, description: String, permissions: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            role_id: Uuid::new_v4(),
            tenant_id,
            name,
            description,
            permissions,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// The role granted to the first administrator of a freshly provisioned tenant.
    pub fn tenant_admin(tenant_id: Uuid) -> Self {
        Self::new(
            tenant_id,
            TENANT_ADMIN_ROLE.to_string(),
            TENANT_ADMIN_DESCRIPTION.to_string(),
            tenant_admin_permissions(),
        )
    }
}

pub fn tenant_admin_permissions() -> Vec<String> {
    TENANT_ADMIN_RESOURCES
        .iter()
        .flat_map(|resource| {
            CRUD_ACTIONS
                .iter()
                .map(move |action| format!("{}:{}", resource, action))
        })
        .collect()
}

/// Checks the `resource:action` shape; either side may be `*`.
pub fn is_valid_permission(permission: &str) -> bool {
    match permission.split_once(':') {
        Some((resource, action)) => {
            !resource.is_empty() && !action.is_empty() && !action.contains(':')
        }
        None => false,
    }
}

/// Whether a tenant-managed role may carry `permission`. Platform resources
/// and resource wildcards (`*:*`, `*:<action>`) reach outside the tenant.
pub fn is_tenant_grantable(permission: &str) -> bool {
    match permission.split_once(':') {
        Some((resource, _)) if is_valid_permission(permission) => {
            resource != "*" && !PLATFORM_RESOURCES.contains(&resource)
        }
        _ => false,
    }
}
