//! PostgreSQL implementation of the persistence traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use super::{AccountTransition, CredentialStore, RedemptionCommit, RoleDirectory, UserDirectory};
use crate::models::{Credential, OneTimeToken, Role, User, UserStatus};
use crate::services::{ServiceError, TokenDigest};

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

/// PostgreSQL-backed directories and credential store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            ServiceError::from(e)
        })?;
        Ok(())
    }
}

// ==================== User Operations ====================

#[async_trait]
impl UserDirectory for PgStore {
    async fn create_user(&self, user: &User) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, tenant_id, email, full_name, status, email_verified, last_login_utc, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.user_id)
        .bind(user.tenant_id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(user.status.as_str())
        .bind(user.email_verified)
        .bind(user.last_login_utc)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::EmailAlreadyRegistered
            } else {
                ServiceError::from(e)
            }
        })?;
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn get_user_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 AND LOWER(email) = LOWER($2)",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_users(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE tenant_id = $1
            ORDER BY created_utc, user_id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update_user(&self, user: &User) -> Result<(), ServiceError> {
        let result = sqlx::query(
            "UPDATE users SET full_name = $1, email = $2, email_verified = $3, updated_utc = NOW() \
             WHERE user_id = $4",
        )
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(user.user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::EmailAlreadyRegistered
            } else {
                ServiceError::from(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::UserNotFound);
        }
        Ok(())
    }

    async fn update_user_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
    ) -> Result<(), ServiceError> {
        let result =
            sqlx::query("UPDATE users SET status = $1, updated_utc = NOW() WHERE user_id = $2")
                .bind(status.as_str())
                .bind(user_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::UserNotFound);
        }
        Ok(())
    }

    async fn update_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), ServiceError> {
        sqlx::query("UPDATE users SET last_login_utc = $1 WHERE user_id = $2")
            .bind(at)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<(), ServiceError> {
        // credentials, one_time_tokens and user_roles cascade.
        let result = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::UserNotFound);
        }
        Ok(())
    }
}

// ==================== Role Operations ====================

#[async_trait]
impl RoleDirectory for PgStore {
    async fn create_role(&self, role: &Role) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO roles (role_id, tenant_id, name, description, permissions, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(role.role_id)
        .bind(role.tenant_id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(&role.permissions)
        .bind(role.created_utc)
        .bind(role.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::RoleAlreadyExists
            } else {
                ServiceError::from(e)
            }
        })?;
        Ok(())
    }

    async fn get_role(&self, role_id: Uuid) -> Result<Option<Role>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE role_id = $1")
                .bind(role_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn get_role_by_name(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Option<Role>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE tenant_id = $1 AND name = $2")
                .bind(tenant_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE tenant_id = $1 ORDER BY name")
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn update_role(&self, role: &Role) -> Result<(), ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE roles SET name = $1, description = $2, permissions = $3, updated_utc = NOW()
            WHERE role_id = $4
            "#,
        )
        .bind(&role.name)
        .bind(&role.description)
        .bind(&role.permissions)
        .bind(role.role_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::RoleAlreadyExists
            } else {
                ServiceError::from(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::RoleNotFound);
        }
        Ok(())
    }

    async fn delete_role(&self, role_id: Uuid) -> Result<(), ServiceError> {
        let result = sqlx::query("DELETE FROM roles WHERE role_id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::RoleNotFound);
        }
        Ok(())
    }

    async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id, tenant_id, assigned_utc)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, role_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), ServiceError> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_user_roles(&self, user_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        Ok(sqlx::query_as::<_, Role>(
            r#"
            SELECT r.* FROM roles r
            JOIN user_roles ur ON ur.role_id = r.role_id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

// ==================== Credential Operations ====================

#[async_trait]
impl CredentialStore for PgStore {
    async fn create_credential(&self, credential: &Credential) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (user_id, password_hash, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(credential.user_id)
        .bind(&credential.password_hash)
        .bind(credential.created_utc)
        .bind(credential.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Credential>("SELECT * FROM credentials WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn update_credential(&self, credential: &Credential) -> Result<(), ServiceError> {
        let result = sqlx::query(
            "UPDATE credentials SET password_hash = $1, updated_utc = NOW() WHERE user_id = $2",
        )
        .bind(&credential.password_hash)
        .bind(credential.user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::UserNotFound);
        }
        Ok(())
    }

    async fn delete_credential(&self, user_id: Uuid) -> Result<(), ServiceError> {
        sqlx::query("DELETE FROM credentials WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== One-Time Token Operations ====================

    async fn create_token(&self, token: &OneTimeToken) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO one_time_tokens (digest, user_id, purpose, expires_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(token.digest.as_bytes().as_slice())
        .bind(token.user_id)
        .bind(token.purpose.as_str())
        .bind(token.expires_utc)
        .bind(token.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::TokenCollision
            } else {
                ServiceError::from(e)
            }
        })?;
        Ok(())
    }

    async fn get_token(&self, digest: &TokenDigest) -> Result<Option<OneTimeToken>, ServiceError> {
        Ok(sqlx::query_as::<_, OneTimeToken>(
            "SELECT * FROM one_time_tokens WHERE digest = $1",
        )
        .bind(digest.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_token(&self, digest: &TokenDigest) -> Result<bool, ServiceError> {
        let result = sqlx::query("DELETE FROM one_time_tokens WHERE digest = $1")
            .bind(digest.as_bytes().as_slice())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_tokens(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = sqlx::query("DELETE FROM one_time_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let result = sqlx::query("DELETE FROM one_time_tokens WHERE expires_utc <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit_redemption(&self, commit: &RedemptionCommit) -> Result<User, ServiceError> {
        let mut tx = self.pool.begin().await?;

        // Holding the user row keeps a concurrent suspension from slipping in
        // between this check and the status update.
        let current =
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1 FOR UPDATE")
                .bind(commit.user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            tx.rollback().await?;
            return Err(ServiceError::UserNotFound);
        };
        if let Err(e) = commit.transition.check_from(current.status) {
            tx.rollback().await?;
            return Err(e);
        }

        // Row-level delete is the consumption point; a concurrent redeemer
        // blocks here and then sees no row.
        let consumed: Option<(Vec<u8>,)> = sqlx::query_as(
            "DELETE FROM one_time_tokens WHERE digest = $1 AND user_id = $2 RETURNING digest",
        )
        .bind(commit.digest.as_bytes().as_slice())
        .bind(commit.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        if consumed.is_none() {
            tx.rollback().await?;
            return Err(ServiceError::TokenInvalid);
        }

        if let Some(hash) = &commit.password_hash {
            sqlx::query(
                r#"
                INSERT INTO credentials (user_id, password_hash, created_utc, updated_utc)
                VALUES ($1, $2, NOW(), NOW())
                ON CONFLICT (user_id) DO UPDATE
                SET password_hash = EXCLUDED.password_hash, updated_utc = NOW()
                "#,
            )
            .bind(commit.user_id)
            .bind(hash)
            .execute(&mut *tx)
            .await?;
        }

        let updated = match &commit.transition {
            AccountTransition::Activate => {
                sqlx::query(
                    r#"
                    UPDATE users SET status = $1, email_verified = TRUE, updated_utc = NOW()
                    WHERE user_id = $2 AND status IN ($3, $1)
                    "#,
                )
                .bind(UserStatus::Active.as_str())
                .bind(commit.user_id)
                .bind(UserStatus::PendingSetup.as_str())
                .execute(&mut *tx)
                .await?
            }
            AccountTransition::ActivateInvited { full_name } => {
                sqlx::query(
                    r#"
                    UPDATE users SET status = $1, email_verified = TRUE, full_name = $2, updated_utc = NOW()
                    WHERE user_id = $3 AND status = $4
                    "#,
                )
                .bind(UserStatus::Active.as_str())
                .bind(full_name)
                .bind(commit.user_id)
                .bind(UserStatus::PendingInvite.as_str())
                .execute(&mut *tx)
                .await?
            }
            AccountTransition::MarkEmailVerified => {
                sqlx::query(
                    "UPDATE users SET email_verified = TRUE, updated_utc = NOW() WHERE user_id = $1 AND status <> $2",
                )
                .bind(commit.user_id)
                .bind(UserStatus::Suspended.as_str())
                .execute(&mut *tx)
                .await?
            }
        };

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(ServiceError::TokenInvalid);
        }

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(commit.user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(user) = user else {
            tx.rollback().await?;
            return Err(ServiceError::UserNotFound);
        };

        tx.commit().await?;
        Ok(user)
    }
}
