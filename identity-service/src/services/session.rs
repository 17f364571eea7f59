use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::services::ServiceError;

/// Stateless session credentials: HS256-signed claims, validated without I/O.
#[derive(Clone)]
pub struct SessionIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// Claims carried by both access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub token_use: TokenUse,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Unique token ID
    pub jti: String,
}

/// Token pair returned to clients
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl SessionIssuer {
    pub fn new(config: &JwtConfig) -> Self {
        Self::from_secret(
            config.secret.expose_secret().as_bytes(),
            Duration::minutes(config.access_token_expiry_minutes),
            Duration::hours(config.refresh_token_expiry_hours),
        )
    }

    pub fn from_secret(secret: &[u8], access_token_ttl: Duration, refresh_token_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_token_ttl,
            refresh_token_ttl,
        }
    }

    pub fn issue_access(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<String, ServiceError> {
        self.issue(user_id, tenant_id, email, TokenUse::Access, self.access_token_ttl)
    }

    pub fn issue_refresh(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<String, ServiceError> {
        self.issue(user_id, tenant_id, email, TokenUse::Refresh, self.refresh_token_ttl)
    }

    pub fn issue_pair(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<TokenResponse, ServiceError> {
        Ok(TokenResponse {
            access_token: self.issue_access(user_id, tenant_id, email)?,
            refresh_token: self.issue_refresh(user_id, tenant_id, email)?,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry_seconds(),
        })
    }

    fn issue(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        email: &str,
        token_use: TokenUse,
        ttl: Duration,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            user_id,
            tenant_id,
            email: email.to_string(),
            token_use,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to sign token: {}", e)))
    }

    /// Checks signature, algorithm and expiry of either token kind.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ServiceError::TokenExpired,
                _ => ServiceError::TokenInvalid,
            })
    }

    pub fn validate_access(&self, token: &str) -> Result<SessionClaims, ServiceError> {
        self.validate_use(token, TokenUse::Access)
    }

    pub fn validate_refresh(&self, token: &str) -> Result<SessionClaims, ServiceError> {
        self.validate_use(token, TokenUse::Refresh)
    }

    fn validate_use(&self, token: &str, expected: TokenUse) -> Result<SessionClaims, ServiceError> {
        let claims = self.validate(token)?;
        if claims.token_use != expected {
            return Err(ServiceError::TokenInvalid);
        }
        Ok(claims)
    }

    /// Exchanges a refresh token for a new access token. The account is not
    /// re-checked; staleness is bounded by the refresh lifetime.
    pub fn refresh(&self, refresh_token: &str) -> Result<String, ServiceError> {
        let claims = self.validate_refresh(refresh_token)?;
        self.issue_access(claims.user_id, claims.tenant_id, &claims.email)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_ttl.num_seconds()
    }
}
