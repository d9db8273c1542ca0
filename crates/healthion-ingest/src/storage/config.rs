use healthion_common::{HealthionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::aws::AwsSettings;
use crate::config::{env_opt, env_or};

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    /// Bucket used for presigned uploads; notifications carry their own bucket
    pub bucket: String,
    #[serde(skip_serializing)]
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "eu-north-1".to_string(),
            bucket: "healthion-uploads".to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            endpoint: env_opt("S3_ENDPOINT"),
            region: env_opt("S3_REGION")
                .or_else(|| env_opt("AWS_REGION"))
                .unwrap_or(defaults.region),
            bucket: env_opt("S3_BUCKET").unwrap_or(defaults.bucket),
            access_key: env_opt("S3_ACCESS_KEY").or_else(|| env_opt("AWS_ACCESS_KEY_ID")),
            secret_key: env_opt("S3_SECRET_KEY").or_else(|| env_opt("AWS_SECRET_ACCESS_KEY")),
            path_style: env_or("S3_PATH_STYLE", defaults.path_style),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }

    pub fn aws_settings(&self) -> AwsSettings {
        AwsSettings {
            region: self.region.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(HealthionError::config("S3 bucket cannot be empty"));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(HealthionError::config(
                "S3 access key and secret key must be configured together",
            ));
        }
        Ok(())
    }
}
