//! User model - tenant-scoped accounts and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use utoipa::ToSchema;
use uuid::Uuid;

/// Account lifecycle state.
///
/// `PendingSetup` and `PendingInvite` move to `Active` when a one-time token
/// is redeemed. `Suspended` is terminal within this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    PendingSetup,
    PendingInvite,
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::PendingSetup => "PENDING_SETUP",
            UserStatus::PendingInvite => "PENDING_INVITE",
            UserStatus::Active => "ACTIVE",
            UserStatus::Suspended => "SUSPENDED",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, UserStatus::PendingSetup | UserStatus::PendingInvite)
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_SETUP" => Ok(UserStatus::PendingSetup),
            "PENDING_INVITE" => Ok(UserStatus::PendingInvite),
            "ACTIVE" => Ok(UserStatus::Active),
            "SUSPENDED" => Ok(UserStatus::Suspended),
            _ => Err(format!("Invalid user status: {}", s)),
        }
    }
}

/// User entity (tenant-scoped).
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub status: UserStatus,
    pub email_verified: bool,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    /// Create a new user in the given status.
    pub fn new(tenant_id: Uuid, email: String, full_name: String, status: UserStatus) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            email,
            full_name,
            status,
            email_verified: false,
            last_login_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            user_id: row.try_get("user_id")?,
            tenant_id: row.try_get("tenant_id")?,
            email: row.try_get("email")?,
            full_name: row.try_get("full_name")?,
            status: status.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            email_verified: row.try_get("email_verified")?,
            last_login_utc: row.try_get("last_login_utc")?,
            created_utc: row.try_get("created_utc")?,
            updated_utc: row.try_get("updated_utc")?,
        })
    }
}

/// User response for API (no internal timestamps beyond what callers need).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub status: UserStatus,
    pub email_verified: bool,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            user_id: u.user_id,
            tenant_id: u.tenant_id,
            email: u.email,
            full_name: u.full_name,
            status: u.status,
            email_verified: u.email_verified,
            last_login_utc: u.last_login_utc,
            created_utc: u.created_utc,
        }
    }
}
