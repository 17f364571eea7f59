use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is not active")]
    AccountNotActive,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("Role already exists")]
    RoleAlreadyExists,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token expired")]
    TokenExpired,

    #[error("Malformed token")]
    MalformedToken,

    #[error("Token digest collision")]
    TokenCollision,

    #[error("User not found")]
    UserNotFound,

    #[error("Role not found")]
    RoleNotFound,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Notification error: {0}")]
    Notification(anyhow::Error),

    #[error("Event publish error: {0}")]
    EventPublish(anyhow::Error),
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Database(anyhow::Error::new(err))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::AccountNotActive => {
                AppError::Unauthorized(anyhow::anyhow!("Account is not active"))
            }
            ServiceError::EmailAlreadyRegistered => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            ServiceError::RoleAlreadyExists => {
                AppError::Conflict(anyhow::anyhow!("Role already exists"))
            }
            // Absence and expiry are deliberately indistinguishable to callers.
            ServiceError::TokenInvalid | ServiceError::TokenExpired => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
            }
            ServiceError::MalformedToken => {
                AppError::BadRequest(anyhow::anyhow!("Malformed token"))
            }
            ServiceError::TokenCollision => {
                AppError::InternalError(anyhow::anyhow!("Token generation failed"))
            }
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::RoleNotFound => AppError::NotFound(anyhow::anyhow!("Role not found")),
            ServiceError::PermissionDenied(e) => AppError::Forbidden(anyhow::anyhow!(e)),
            ServiceError::InvalidArgument(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::Notification(e) => AppError::EmailError(e.to_string()),
            ServiceError::EventPublish(e) => {
                AppError::InternalError(e.context("Failed to publish event"))
            }
        }
    }
}
