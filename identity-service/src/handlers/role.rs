//! Tenant role management.

use service_core::{
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use uuid::Uuid;

use crate::{
    dtos::admin::{CreateRoleRequest, UpdateRoleRequest},
    dtos::ErrorResponse,
    middleware::{require_permission, AuthUser},
    models::Role,
    utils::ValidatedJson,
    AppState,
};

/// Create a role in the caller's tenant
///
/// Permissions are `resource:action` strings; duplicates are dropped.
#[utoipa::path(
    post,
    path = "/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 400, description = "Malformed permission", body = ErrorResponse),
        (status = 409, description = "Role name already taken", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "roles", "create").await?;
    let role = state
        .roles
        .create_role(user.0.tenant_id, &req.name, &req.description, req.permissions)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/roles",
    responses(
        (status = 200, description = "Roles of the tenant", body = [Role])
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "roles", "read").await?;
    let roles = state.roles.list_roles(user.0.tenant_id).await?;
    Ok(Json(roles))
}

#[utoipa::path(
    get,
    path = "/roles/{id}",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role", body = Role),
        (status = 404, description = "Role not found", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(role_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "roles", "read").await?;
    let role = state.roles.get_role(user.0.tenant_id, role_id).await?;
    Ok(Json(role))
}

#[utoipa::path(
    patch,
    path = "/roles/{id}",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Updated role", body = Role),
        (status = 400, description = "Malformed permission", body = ErrorResponse),
        (status = 404, description = "Role not found", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(role_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "roles", "update").await?;
    let role = state
        .roles
        .update_role(user.0.tenant_id, role_id, req.into())
        .await?;
    Ok(Json(role))
}

/// Delete a role and every assignment of it
#[utoipa::path(
    delete,
    path = "/roles/{id}",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(role_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "roles", "delete").await?;
    state.roles.delete_role(user.0.tenant_id, role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
