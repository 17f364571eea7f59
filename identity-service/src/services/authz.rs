//! Permission evaluation over role-granted `resource:action` strings.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::role::is_valid_permission;
use crate::services::policy::{PolicyEngine, PolicyInput, PolicyUser};
use crate::services::store::RoleDirectory;
use crate::services::{ServiceError, SessionClaims, SessionIssuer};

pub const REASON_INVALID_SESSION: &str = "Invalid or expired token";

/// Allow/deny verdict with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
}

impl AccessDecision {
    fn new(allowed: bool, reason: impl Into<String>) -> Self {
        Self {
            allowed,
            reason: reason.into(),
        }
    }
}

/// Local decision: exact, `resource:*`, `*:action`, then `*:*`. First hit wins.
pub fn evaluate_locally(permissions: &BTreeSet<String>, action: &str, resource: &str) -> AccessDecision {
    let candidates = [
        (format!("{}:{}", resource, action), "Access granted"),
        (format!("{}:*", resource), "Access granted (wildcard resource)"),
        (format!("*:{}", action), "Access granted (wildcard action)"),
        ("*:*".to_string(), "Access granted (super admin)"),
    ];

    candidates
        .into_iter()
        .find(|(permission, _)| permissions.contains(permission))
        .map(|(_, reason)| AccessDecision::new(true, reason))
        .unwrap_or_else(|| AccessDecision::new(false, "Access denied"))
}

#[derive(Clone)]
pub struct PermissionEvaluator {
    roles: Arc<dyn RoleDirectory>,
    sessions: Arc<SessionIssuer>,
    policy: Option<Arc<dyn PolicyEngine>>,
}

impl PermissionEvaluator {
    pub fn new(
        roles: Arc<dyn RoleDirectory>,
        sessions: Arc<SessionIssuer>,
        policy: Option<Arc<dyn PolicyEngine>>,
    ) -> Self {
        Self {
            roles,
            sessions,
            policy,
        }
    }

    /// Union of the permissions of every role assigned to the user.
    pub async fn user_permissions(&self, user_id: Uuid) -> Result<BTreeSet<String>, ServiceError> {
        Ok(self
            .roles
            .list_user_roles(user_id)
            .await?
            .into_iter()
            .flat_map(|role| role.permissions)
            .collect())
    }

    /// Local check of a single `resource:action` permission.
    pub async fn has_permission(&self, user_id: Uuid, permission: &str) -> Result<bool, ServiceError> {
        let (resource, action) = permission
            .split_once(':')
            .filter(|_| is_valid_permission(permission))
            .ok_or_else(|| {
                ServiceError::InvalidArgument(format!("Invalid permission format: {}", permission))
            })?;
        let permissions = self.user_permissions(user_id).await?;
        Ok(evaluate_locally(&permissions, action, resource).allowed)
    }

    /// Validates the session, then decides. An invalid session yields a deny,
    /// not an error.
    #[instrument(skip(self, session_token))]
    pub async fn check_access(
        &self,
        session_token: &str,
        action: &str,
        resource: &str,
    ) -> Result<AccessDecision, ServiceError> {
        let claims = match self.sessions.validate_access(session_token) {
            Ok(claims) => claims,
            Err(ServiceError::TokenInvalid | ServiceError::TokenExpired) => {
                return Ok(AccessDecision::new(false, REASON_INVALID_SESSION));
            }
            Err(e) => return Err(e),
        };
        self.decide(&claims, action, resource).await
    }

    /// Decision for an already authenticated caller.
    pub async fn decide(
        &self,
        claims: &SessionClaims,
        action: &str,
        resource: &str,
    ) -> Result<AccessDecision, ServiceError> {
        let permissions = self.user_permissions(claims.user_id).await?;

        if let Some(engine) = &self.policy {
            let input = PolicyInput {
                user: PolicyUser {
                    id: claims.user_id,
                    tenant_id: claims.tenant_id,
                    email: claims.email.clone(),
                    permissions: permissions.iter().cloned().collect(),
                },
                action: action.to_string(),
                resource: resource.to_string(),
            };

            match engine.evaluate(&input).await {
                Ok(decision) => {
                    let reason = decision
                        .reason
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| {
                            if decision.allow {
                                "Access granted by policy".to_string()
                            } else {
                                "Access denied by policy".to_string()
                            }
                        });
                    return Ok(AccessDecision::new(decision.allow, reason));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Policy engine unavailable, evaluating locally");
                }
            }
        }

        Ok(evaluate_locally(&permissions, action, resource))
    }
}
