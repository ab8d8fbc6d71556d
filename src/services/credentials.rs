use async_trait::async_trait;
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;

use crate::db::credential_queries;
use crate::services::encryption::{EncryptionError, EncryptionService};

/// A decrypted IMAI API key. Lives for one request; never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Display form: first 12 and last 4 characters.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 16 {
            return "••••".to_string();
        }
        let head: String = chars[..12].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}••••{tail}")
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiToken").field(&self.masked()).finish()
    }
}

/// Per-shop source of IMAI bearer tokens.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when the shop has not connected an IMAI key.
    async fn bearer_token(&self, shop: &str) -> Result<Option<ApiToken>, CredentialError>;
}

/// Reads AES-256-GCM encrypted keys from the `api_keys` table.
pub struct PgCredentialStore {
    pool: PgPool,
    encryption: Arc<EncryptionService>,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool, encryption: Arc<EncryptionService>) -> Self {
        Self { pool, encryption }
    }

    /// Encrypt and store a shop's key.
    pub async fn store_key(&self, shop: &str, token: &ApiToken) -> Result<(), CredentialError> {
        let sealed = self.encryption.encrypt_to_string(token.expose())?;
        credential_queries::upsert_encrypted_key(&self.pool, shop, &sealed).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn bearer_token(&self, shop: &str) -> Result<Option<ApiToken>, CredentialError> {
        let Some(sealed) = credential_queries::get_encrypted_key(&self.pool, shop).await? else {
            return Ok(None);
        };
        let token = self.encryption.decrypt_from_string(&sealed)?;
        Ok(Some(ApiToken::new(token)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored API key could not be decrypted: {0}")]
    Encryption(#[from] EncryptionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_keeps_prefix_and_suffix() {
        let token = ApiToken::new("imai_sk_live_0123456789abcdef");
        assert_eq!(token.masked(), "imai_sk_live••••cdef");
    }

    #[test]
    fn test_debug_never_prints_secret() {
        let token = ApiToken::new("imai_sk_live_0123456789abcdef");
        let printed = format!("{token:?}");
        assert!(!printed.contains("0123456789"));
        assert_eq!(format!("{:?}", ApiToken::new("short")), "ApiToken(\"••••\")");
    }
}
