use service_core::{
    axum::{extract::State, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{
        ChangePasswordRequest, ConfirmPasswordRequest, ForgotPasswordRequest, MessageResponse,
        ResetPasswordRequest,
    },
    dtos::ErrorResponse,
    middleware::AuthUser,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Request a password reset link
///
/// Answers identically whether or not the account exists.
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Request received", body = MessageResponse),
        (status = 400, description = "Malformed tenant identifier", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Password"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authn
        .forgot_password(&req.email, &req.tenant_id)
        .await?;

    Ok(Json(MessageResponse::new(
        "If your email is registered, you will receive a password reset link shortly.",
    )))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset successful", body = MessageResponse),
        (status = 400, description = "Malformed token", body = ErrorResponse),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Password"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authn
        .reset_password(&req.token, Password::new(req.new_password))
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

/// Change the caller's password
#[utoipa::path(
    post,
    path = "/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 401, description = "Current password is wrong", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Password",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authn
        .change_password(
            user.0.user_id,
            &Password::new(req.current_password),
            &Password::new(req.new_password),
        )
        .await?;
    Ok(Json(MessageResponse::new("Password changed")))
}

/// Re-check the caller's password before a sensitive operation
#[utoipa::path(
    post,
    path = "/auth/confirm-password",
    request_body = ConfirmPasswordRequest,
    responses(
        (status = 200, description = "Password confirmed", body = MessageResponse),
        (status = 401, description = "Password is wrong", body = ErrorResponse)
    ),
    tag = "Password",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn confirm_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ConfirmPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authn
        .confirm_password(user.0.user_id, &Password::new(req.password))
        .await?;
    Ok(Json(MessageResponse::new("Password confirmed")))
}
