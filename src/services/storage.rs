use s3::creds::Credentials;
use s3::{Bucket, Region};

use crate::config::R2Settings;

/// Client for Cloudflare R2 object storage (S3-compatible), where generated
/// assets are re-hosted.
pub struct R2Client {
    bucket: Box<Bucket>,
}

impl R2Client {
    pub fn new(settings: &R2Settings) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: settings.endpoint.clone(),
        };

        let credentials = Credentials::new(
            Some(&settings.access_key),
            Some(&settings.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(&settings.bucket, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }

    /// Upload an asset. Writing the same key again overwrites it.
    pub async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
