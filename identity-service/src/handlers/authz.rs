//! Authorization decisions.

use service_core::{
    axum::{
        extract::{Path, State},
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use uuid::Uuid;

use crate::{
    dtos::authz::{CheckAccessRequest, UserPermissionsResponse},
    dtos::ErrorResponse,
    middleware::AuthUser,
    services::AccessDecision,
    utils::ValidatedJson,
    AppState,
};

/// Decide whether a session may perform `action` on `resource`
///
/// An invalid or expired session yields `allowed: false`, not an error.
#[utoipa::path(
    post,
    path = "/authz/check",
    request_body = CheckAccessRequest,
    responses(
        (status = 200, description = "Decision", body = AccessDecision),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authorization"
)]
pub async fn check_access(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CheckAccessRequest>,
) -> Result<impl IntoResponse, AppError> {
    let decision = state
        .authz
        .check_access(&req.token, &req.action, &req.resource)
        .await?;

    tracing::debug!(
        action = %req.action,
        resource = %req.resource,
        allowed = decision.allowed,
        "Access checked"
    );

    Ok(Json(decision))
}

/// Effective permissions of a user
///
/// Callers may read their own permissions; anyone else needs `roles:read`.
#[utoipa::path(
    get,
    path = "/authz/users/{id}/permissions",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Permission set", body = UserPermissionsResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Authorization",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn user_permissions(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if user.0.user_id != user_id {
        crate::middleware::require_permission(&state, &user, "roles", "read").await?;
        // Tenant scoping: foreign users are reported as absent.
        state.users.get_user(user.0.tenant_id, user_id).await?;
    }

    let permissions = state.authz.user_permissions(user_id).await?;
    Ok(Json(UserPermissionsResponse {
        user_id,
        permissions: permissions.into_iter().collect(),
    }))
}
