//! Opaque one-time tokens: random plaintext for the user, SHA-256 digest for storage.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::services::ServiceError;

/// 256 bits of entropy per token.
pub const TOKEN_BYTES: usize = 32;

/// One-way digest of a token's raw bytes. This is the storage key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenDigest([u8; 32]);

impl TokenDigest {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenDigest(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

/// Freshly minted token. The plaintext must only ever reach the recipient.
pub struct GeneratedToken {
    pub plaintext: String,
    pub digest: TokenDigest,
}

impl fmt::Debug for GeneratedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedToken")
            .field("plaintext", &"[REDACTED]")
            .field("digest", &self.digest)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenCodec;

impl TokenCodec {
    pub fn new() -> Self {
        Self
    }

    /// Draws a new token from the OS entropy source.
    pub fn generate(&self) -> Result<GeneratedToken, ServiceError> {
        let mut raw = [0u8; TOKEN_BYTES];
        OsRng
            .try_fill_bytes(&mut raw)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Entropy source failure: {}", e)))?;

        Ok(GeneratedToken {
            plaintext: URL_SAFE.encode(raw),
            digest: hash(&raw),
        })
    }

    /// Recomputes the storage digest from a plaintext presented by a user.
    pub fn digest(&self, plaintext: &str) -> Result<TokenDigest, ServiceError> {
        let raw = URL_SAFE
            .decode(plaintext.trim())
            .map_err(|_| ServiceError::MalformedToken)?;

        if raw.len() != TOKEN_BYTES {
            return Err(ServiceError::MalformedToken);
        }

        Ok(hash(&raw))
    }
}

fn hash(raw: &[u8]) -> TokenDigest {
    TokenDigest(Sha256::digest(raw).into())
}
