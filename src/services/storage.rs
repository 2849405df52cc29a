use async_trait::async_trait;
use chrono::Utc;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Durable storage for finished segments.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store a segment and return the URI it can be analysed from.
    async fn upload(&self, data: &[u8], camera_name: &str) -> Result<String, StorageError>;
}

/// S3-compatible object storage (R2, MinIO, GCS interoperability endpoint).
pub struct ObjectStorage {
    bucket: Box<Bucket>,
}

impl ObjectStorage {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self { bucket })
    }

    pub fn bucket_name(&self) -> String {
        self.bucket.name()
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(key).await.map_err(StorageError::S3)?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    async fn upload(&self, data: &[u8], camera_name: &str) -> Result<String, StorageError> {
        let key = object_key(camera_name, Utc::now());
        let response = self
            .bucket
            .put_object_with_content_type(&key, data, "video/mp4")
            .await
            .map_err(StorageError::S3)?;

        let code = response.status_code();
        if !(200..300).contains(&code) {
            return Err(StorageError::Rejected(code));
        }
        Ok(format!("s3://{}/{}", self.bucket.name(), key))
    }
}

/// `<camera_slug>/<UTC timestamp>.mp4`
pub fn object_key(camera_name: &str, at: chrono::DateTime<Utc>) -> String {
    format!("{}/{}.mp4", camera_slug(camera_name), at.format("%Y%m%dT%H%M%S%.3fZ"))
}

/// Lower-cased camera name with runs of non-alphanumerics collapsed to `_`.
pub fn camera_slug(camera_name: &str) -> String {
    let mut slug = String::with_capacity(camera_name.len());
    for c in camera_name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage rejected upload with HTTP {0}")]
    Rejected(u16),

    #[error("Failed to read segment: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
