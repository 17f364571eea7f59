use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Password digest owned by exactly one user.
#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    pub user_id: Uuid,
    pub password_hash: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Credential {
    pub fn new(user_id: Uuid, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            password_hash,
            created_utc: now,
            updated_utc: now,
        }
    }
}
