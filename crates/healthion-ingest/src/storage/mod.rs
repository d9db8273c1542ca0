use async_trait::async_trait;
use aws_sdk_s3::{error::DisplayErrorContext, presigning::PresigningConfig, primitives::ByteStream, Client};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::aws::load_sdk_config;

pub mod config;

/// Object storage failures. All of them are transient from the pipeline's
/// point of view: the same request may succeed on replay.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 {operation} failed for s3://{bucket}/{key}: {message}")]
    Request {
        operation: &'static str,
        bucket: String,
        key: String,
        message: String,
    },

    #[error("Local file error for {path}: {message}")]
    Local { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    fn request(
        operation: &'static str,
        bucket: &str,
        key: &str,
        err: impl std::error::Error,
    ) -> Self {
        Self::Request {
            operation,
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: DisplayErrorContext(err).to_string(),
        }
    }
}

/// Metadata of a downloaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// ETag without surrounding quotes
    pub etag: Option<String>,
    /// Version id on versioned buckets
    pub version_id: Option<String>,
}

impl ObjectInfo {
    /// Identity of the downloaded content: version id, else ETag
    pub fn version(&self) -> Option<&str> {
        let present = |v: &&str| !v.is_empty();
        self.version_id
            .as_deref()
            .filter(present)
            .or_else(|| self.etag.as_deref().filter(present))
    }
}

/// Object storage operations the ingestion pipeline depends on
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream `bucket/key` into a local file, returning its metadata
    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<ObjectInfo, StorageError>;

    /// Upload a local file to `bucket/key`, returning the stored size
    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        content_type: Option<&str>,
    ) -> Result<u64, StorageError>;
}

/// S3-backed object storage
#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub async fn new(config: config::StorageConfig) -> Self {
        debug!("Initializing storage with config: {:?}", config);

        let sdk_config = load_sdk_config(&config.aws_settings()).await;
        let mut builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!(bucket = %config.bucket, "Storage client initialized");

        Self {
            client,
            bucket: config.bucket,
        }
    }

    /// Bucket used for presigned uploads
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Check that the upload bucket exists and is reachable
    #[instrument(skip(self))]
    pub async fn bucket_exists(&self) -> Result<bool, StorageError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(StorageError::request("head_bucket", &self.bucket, "", e))
                }
            },
        }
    }

    /// Presigned PUT URL for `key` in the upload bucket
    #[instrument(skip(self))]
    pub async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::request("presign", &self.bucket, key, e))?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::request("presign", &self.bucket, key, e))?;

        Ok(presigned.uri().to_string())
    }
}

#[async_trait]
impl ObjectStore for Storage {
    #[instrument(skip(self, dest))]
    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<ObjectInfo, StorageError> {
        debug!("Downloading s3://{}/{} to {}", bucket, key, dest.display());

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::request("get_object", bucket, key, e))?;

        let etag = response.e_tag().map(normalize_etag);
        let version_id = response
            .version_id()
            .filter(|v| *v != "null")
            .map(str::to_string);

        let mut reader = response.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await?;
        let size = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        info!(bucket, key, size, "Downloaded object");

        Ok(ObjectInfo {
            key: key.to_string(),
            size,
            etag,
            version_id,
        })
    }

    #[instrument(skip(self, src))]
    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        content_type: Option<&str>,
    ) -> Result<u64, StorageError> {
        let size = tokio::fs::metadata(src).await?.len();
        let body = ByteStream::from_path(src).await.map_err(|e| StorageError::Local {
            path: src.to_path_buf(),
            message: e.to_string(),
        })?;

        debug!("Uploading {} bytes to s3://{}/{}", size, bucket, key);

        let mut request = self.client.put_object().bucket(bucket).key(key).body(body);

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::request("put_object", bucket, key, e))?;

        info!(bucket, key, size, "Uploaded object");

        Ok(size)
    }
}

fn normalize_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_etag() {
        assert_eq!(normalize_etag("\"abc123\""), "abc123");
        assert_eq!(normalize_etag("abc123"), "abc123");
    }

    #[test]
    fn test_object_version_prefers_version_id() {
        let mut info = ObjectInfo {
            key: "user/raw/export.xml".to_string(),
            size: 10,
            etag: Some("abc123".to_string()),
            version_id: Some("v2".to_string()),
        };
        assert_eq!(info.version(), Some("v2"));

        info.version_id = None;
        assert_eq!(info.version(), Some("abc123"));

        info.etag = None;
        assert_eq!(info.version(), None);
    }

    #[test]
    fn test_request_error_message() {
        let err = StorageError::request(
            "get_object",
            "bucket",
            "user/raw/export.xml",
            std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"),
        );
        let message = err.to_string();
        assert!(message.contains("get_object"));
        assert!(message.contains("s3://bucket/user/raw/export.xml"));
        assert!(message.contains("timed out"));
    }
}
