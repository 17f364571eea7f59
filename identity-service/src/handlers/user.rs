//! Tenant user administration. Every route acts within the caller's tenant.

use service_core::{
    axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use uuid::Uuid;

use crate::{
    dtos::admin::{
        AssignRoleRequest, CreateUserRequest, InviteUserRequest, ListUsersQuery,
        SuspendUserRequest, UpdateUserRequest, UserListResponse,
    },
    dtos::ErrorResponse,
    middleware::{require_permission, AuthUser},
    models::{Role, UserResponse},
    services::users::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE},
    utils::ValidatedJson,
    AppState,
};

/// Create a user awaiting password setup
#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "users", "create").await?;
    let created = state
        .users
        .create_user(user.0.tenant_id, &req.email, &req.full_name)
        .await?;
    Ok((StatusCode::CREATED, Json(created.sanitized())))
}

/// Invite a user; the invitation email is sent asynchronously
#[utoipa::path(
    post,
    path = "/users/invite",
    request_body = InviteUserRequest,
    responses(
        (status = 201, description = "User invited", body = UserResponse),
        (status = 404, description = "Role not found", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn invite_user(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<InviteUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "users", "create").await?;
    let invited = state
        .users
        .invite_user(user.0.tenant_id, &req.email, &req.full_name, &req.role_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(invited.sanitized())))
}

#[utoipa::path(
    get,
    path = "/users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Page of users", body = UserListResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "users", "read").await?;
    let users = state
        .users
        .list_users(user.0.tenant_id, query.limit, query.offset)
        .await?;
    Ok(Json(UserListResponse {
        users: users.into_iter().map(UserResponse::from).collect(),
        limit: query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE),
        offset: query.offset.unwrap_or(0).max(0),
    }))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "users", "read").await?;
    let found = state.users.get_user(user.0.tenant_id, user_id).await?;
    Ok(Json(found.sanitized()))
}

#[utoipa::path(
    patch,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "users", "update").await?;
    let updated = state
        .users
        .update_user(user.0.tenant_id, user_id, req.into())
        .await?;
    Ok(Json(updated.sanitized()))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "users", "delete").await?;
    state.users.delete_user(user.0.tenant_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/users/{id}/suspend",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = SuspendUserRequest,
    responses(
        (status = 200, description = "User suspended", body = UserResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn suspend_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<SuspendUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "users", "update").await?;
    let suspended = state
        .users
        .suspend_user(user.0.tenant_id, user_id, user.0.user_id, &req.reason)
        .await?;
    Ok(Json(suspended.sanitized()))
}

#[utoipa::path(
    get,
    path = "/users/{id}/roles",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Assigned roles", body = [Role]),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn list_user_roles(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "roles", "read").await?;
    let roles = state
        .users
        .list_user_roles(user.0.tenant_id, user_id)
        .await?;
    Ok(Json(roles))
}

#[utoipa::path(
    post,
    path = "/users/{id}/roles",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = AssignRoleRequest,
    responses(
        (status = 204, description = "Role assigned"),
        (status = 404, description = "User or role not found", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn assign_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AssignRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "roles", "update").await?;
    state
        .users
        .assign_role(user.0.tenant_id, user_id, req.role_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/users/{id}/roles/{role_id}",
    params(
        ("id" = Uuid, Path, description = "User id"),
        ("role_id" = Uuid, Path, description = "Role id")
    ),
    responses(
        (status = 204, description = "Role revoked"),
        (status = 404, description = "User or role not found", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn revoke_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, "roles", "update").await?;
    state
        .users
        .revoke_role(user.0.tenant_id, user_id, role_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
