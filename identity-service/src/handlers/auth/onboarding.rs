use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{
        LoginResponse, MessageResponse, RegisterInvitedRequest, SetInitialPasswordRequest,
        VerifyEmailRequest,
    },
    dtos::ErrorResponse,
    middleware::AuthUser,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Set the first password with a setup token
#[utoipa::path(
    post,
    path = "/auth/initial-password",
    request_body = SetInitialPasswordRequest,
    responses(
        (status = 200, description = "Account activated", body = MessageResponse),
        (status = 400, description = "Malformed token", body = ErrorResponse),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse),
        (status = 403, description = "Account suspended", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Onboarding"
)]
pub async fn set_initial_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SetInitialPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .authn
        .set_initial_password(&req.token, Password::new(req.new_password))
        .await?;
    Ok(Json(MessageResponse::new("Password set, account is active")))
}

/// Accept an invitation; responds with a session
#[utoipa::path(
    post,
    path = "/auth/register-invited",
    request_body = RegisterInvitedRequest,
    responses(
        (status = 201, description = "Registered and logged in", body = LoginResponse),
        (status = 400, description = "Malformed token", body = ErrorResponse),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Onboarding"
)]
pub async fn register_invited(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterInvitedRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .authn
        .register_invited_user(&req.token, &req.full_name, Password::new(req.password))
        .await?;
    Ok((StatusCode::CREATED, Json(LoginResponse::from(outcome))))
}

/// Confirm an email address with a verification token
#[utoipa::path(
    post,
    path = "/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "Onboarding"
)]
pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyEmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.authn.verify_email(&req.token).await?;
    Ok(Json(MessageResponse::new("Email verified successfully")))
}

/// Send the caller a fresh verification link
#[utoipa::path(
    post,
    path = "/auth/request-email-verification",
    responses(
        (status = 202, description = "Verification email sent", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Onboarding",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn request_email_verification(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.authn.request_email_verification(user.0.user_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("Verification email sent")),
    ))
}
