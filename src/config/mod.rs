use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the asset rehost queue. Rehosting is
    /// disabled when unset.
    pub redis_url: Option<String>,

    /// AES-256-GCM key for stored IMAI API keys (base64-encoded, 32 bytes)
    pub encryption_key: String,

    /// Shopify app secret used to verify session tokens
    pub shopify_api_secret: String,

    /// Shopify app API key; when set, session tokens must carry it as `aud`
    pub shopify_api_key: Option<String>,

    /// IMAI API base URL
    #[serde(default = "default_imai_base_url")]
    pub imai_base_url: String,

    /// Public URL of this app, used to build the webhook callback address
    pub app_url: String,

    /// Shared secret for IMAI webhook signatures
    pub imai_webhook_secret: Option<String>,

    /// R2 bucket name (worker only)
    pub r2_bucket: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,
}

/// R2 settings, present only when every field is configured.
#[derive(Debug, Clone)]
pub struct R2Settings {
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_imai_base_url() -> String {
    "https://www.imai.studio".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Callback address IMAI delivers job webhooks to.
    pub fn webhook_url(&self) -> String {
        format!("{}/api/imai/webhook", self.app_url.trim_end_matches('/'))
    }

    pub fn r2(&self) -> Option<R2Settings> {
        Some(R2Settings {
            bucket: self.r2_bucket.clone()?,
            endpoint: self.r2_endpoint.clone()?,
            access_key: self.r2_access_key.clone()?,
            secret_key: self.r2_secret_key.clone()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(app_url: &str) -> AppConfig {
        AppConfig {
            bind_addr: default_bind_addr(),
            database_url: "postgres://localhost/imai".to_string(),
            redis_url: None,
            encryption_key: String::new(),
            shopify_api_secret: "secret".to_string(),
            shopify_api_key: None,
            imai_base_url: default_imai_base_url(),
            app_url: app_url.to_string(),
            imai_webhook_secret: None,
            r2_bucket: Some("assets".to_string()),
            r2_access_key: Some("key".to_string()),
            r2_secret_key: None,
            r2_endpoint: Some("https://r2.example.com".to_string()),
        }
    }

    #[test]
    fn test_webhook_url_trims_trailing_slash() {
        assert_eq!(
            config("https://app.example.com/").webhook_url(),
            "https://app.example.com/api/imai/webhook"
        );
    }

    #[test]
    fn test_r2_requires_every_field() {
        let mut cfg = config("https://app.example.com");
        assert!(cfg.r2().is_none());
        cfg.r2_secret_key = Some("secret".to_string());
        assert_eq!(cfg.r2().unwrap().bucket, "assets");
    }
}
