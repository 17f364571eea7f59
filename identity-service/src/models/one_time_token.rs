//! One-time token model. Only the digest is ever stored.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

use crate::services::TokenDigest;

/// What a one-time token may be redeemed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenPurpose {
    /// Initial password setup and forgotten-password resets.
    PasswordReset,
    EmailVerification,
    Invitation,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::PasswordReset => "PASSWORD_RESET",
            TokenPurpose::EmailVerification => "EMAIL_VERIFICATION",
            TokenPurpose::Invitation => "INVITATION",
        }
    }
}

impl std::str::FromStr for TokenPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASSWORD_RESET" => Ok(TokenPurpose::PasswordReset),
            "EMAIL_VERIFICATION" => Ok(TokenPurpose::EmailVerification),
            "INVITATION" => Ok(TokenPurpose::Invitation),
            _ => Err(format!("Invalid token purpose: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OneTimeToken {
    pub digest: TokenDigest,
    pub user_id: Uuid,
    pub purpose: TokenPurpose,
    pub expires_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl OneTimeToken {
    pub fn new(digest: TokenDigest, user_id: Uuid, purpose: TokenPurpose, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            digest,
            user_id,
            purpose,
            expires_utc: now + ttl,
            created_utc: now,
        }
    }

    /// A token whose expiry instant has been reached is inert.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl<'r> FromRow<'r, PgRow> for OneTimeToken {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let digest: Vec<u8> = row.try_get("digest")?;
        let purpose: String = row.try_get("purpose")?;
        Ok(Self {
            digest: TokenDigest::from_slice(&digest)
                .ok_or_else(|| sqlx::Error::Decode("token digest must be 32 bytes".into()))?,
            user_id: row.try_get("user_id")?,
            purpose: purpose.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            expires_utc: row.try_get("expires_utc")?,
            created_utc: row.try_get("created_utc")?,
        })
    }
}
