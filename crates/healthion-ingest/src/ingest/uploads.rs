//! Producer side of the pipeline: where uploads land and how clients get there
//!
//! Clients upload exports straight to object storage through a presigned
//! PUT URL. Keys follow `{user_id}/raw/{filename}`, which is what the
//! orchestrator derives the user id and archive key from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

use crate::storage::{Storage, StorageError};

/// Longest presigned URL lifetime accepted by S3 (7 days)
pub const MAX_EXPIRATION_SECS: u64 = 604_800;
pub const DEFAULT_EXPIRATION_SECS: u64 = 300;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid upload request: {0}")]
    InvalidRequest(String),

    #[error("Upload bucket {0} does not exist")]
    BucketNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Accepted content types of an export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportContentType {
    #[default]
    #[serde(rename = "application/xml")]
    ApplicationXml,
    #[serde(rename = "text/xml")]
    TextXml,
}

impl ExportContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportContentType::ApplicationXml => "application/xml",
            ExportContentType::TextXml => "text/xml",
        }
    }
}

impl std::str::FromStr for ExportContentType {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "application/xml" => Ok(ExportContentType::ApplicationXml),
            "text/xml" => Ok(ExportContentType::TextXml),
            other => Err(UploadError::InvalidRequest(format!(
                "unsupported content type {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUploadRequest {
    pub user_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_type: ExportContentType,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_expiration")]
    pub expiration_seconds: u64,
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_expiration() -> u64 {
    DEFAULT_EXPIRATION_SECS
}

impl PresignedUploadRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            filename: None,
            file_type: ExportContentType::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            expiration_seconds: DEFAULT_EXPIRATION_SECS,
        }
    }

    pub fn validate(&self) -> Result<(), UploadError> {
        if self.user_id.trim().is_empty() {
            return Err(UploadError::InvalidRequest("user_id is required".to_string()));
        }
        if self.max_file_size < 1 {
            return Err(UploadError::InvalidRequest(
                "max_file_size must be at least 1 byte".to_string(),
            ));
        }
        if !(1..=MAX_EXPIRATION_SECS).contains(&self.expiration_seconds) {
            return Err(UploadError::InvalidRequest(format!(
                "expiration_seconds must be between 1 and {}",
                MAX_EXPIRATION_SECS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUpload {
    pub upload_url: String,
    /// Headers the client must send with the upload
    pub form_fields: BTreeMap<String, String>,
    pub file_key: String,
    pub expires_in: u64,
    pub max_file_size: u64,
    pub content_type: String,
    pub bucket: String,
}

/// Object key for an upload: `{user_id}/raw/{clean filename}`
pub fn file_key(user_id: &str, filename: Option<&str>) -> String {
    file_key_at(user_id, filename, Utc::now())
}

/// [`file_key`] with an explicit clock for keys without a filename
pub fn file_key_at(user_id: &str, filename: Option<&str>, now: DateTime<Utc>) -> String {
    let clean: Option<String> = filename
        .map(|name| {
            name.chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
                .collect::<String>()
        })
        .filter(|name| !name.is_empty());

    match clean {
        Some(name) => format!("{}/raw/{}", user_id, name),
        None => format!("{}/raw/{}.xml", user_id, now.format("%Y%m%dT%H%M%S%.6fZ")),
    }
}

impl Storage {
    /// Presigned PUT for a new export upload in the upload bucket
    #[instrument(skip(self))]
    pub async fn presign_upload(
        &self,
        request: &PresignedUploadRequest,
    ) -> Result<PresignedUpload, UploadError> {
        request.validate()?;

        if !self.bucket_exists().await? {
            return Err(UploadError::BucketNotFound(self.bucket().to_string()));
        }

        let key = file_key(&request.user_id, request.filename.as_deref());
        let content_type = request.file_type.as_str();

        let upload_url = self
            .presign_put(
                &key,
                content_type,
                Duration::from_secs(request.expiration_seconds),
            )
            .await?;

        info!(file_key = %key, expires_in = request.expiration_seconds, "Presigned upload created");

        Ok(PresignedUpload {
            upload_url,
            form_fields: BTreeMap::from([("Content-Type".to_string(), content_type.to_string())]),
            file_key: key,
            expires_in: request.expiration_seconds,
            max_file_size: request.max_file_size,
            content_type: content_type.to_string(),
            bucket: self.bucket().to_string(),
        })
    }
}
