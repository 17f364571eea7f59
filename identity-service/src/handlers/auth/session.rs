use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{
        LoginRequest, LoginResponse, MessageResponse, RefreshRequest, RefreshResponse,
        ValidateTokenRequest, ValidateTokenResponse,
    },
    dtos::ErrorResponse,
    middleware::AuthUser,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Login with email, password and tenant
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Malformed tenant identifier", body = ErrorResponse),
        (status = 401, description = "Invalid credentials or inactive account", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .authn
        .login(&req.email, &Password::new(req.password), &req.tenant_id)
        .await?;
    Ok((StatusCode::OK, Json(LoginResponse::from(outcome))))
}

/// Exchange a refresh token for a new access token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed successfully", body = RefreshResponse),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let access_token = state.authn.refresh_token(&req.refresh_token)?;
    Ok(Json(RefreshResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.sessions.access_token_expiry_seconds(),
    }))
}

/// Validate an access token and return its claims
#[utoipa::path(
    post,
    path = "/auth/validate",
    request_body = ValidateTokenRequest,
    responses(
        (status = 200, description = "Token is valid", body = ValidateTokenResponse),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn validate(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ValidateTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let claims = state.authn.validate_token(&req.token)?;
    Ok(Json(ValidateTokenResponse::from(claims)))
}

/// Revoke the caller's outstanding one-time tokens
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out successfully", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.authn.logout(user.0.user_id).await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}
