//! Shared AWS SDK configuration
//!
//! S3 and SQS clients are built from one `SdkConfig`. Static credentials are
//! used when both keys are configured; otherwise the default provider chain
//! (environment, profile, instance metadata) resolves them.

use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use std::fmt;

/// Credentials and region shared by every AWS client
#[derive(Clone, Default)]
pub struct AwsSettings {
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSettings")
            .field("region", &self.region)
            .field("static_credentials", &self.access_key.is_some())
            .finish_non_exhaustive()
    }
}

pub async fn load_sdk_config(settings: &AwsSettings) -> SdkConfig {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(settings.region.clone()));

    if let (Some(access_key), Some(secret_key)) = (&settings.access_key, &settings.secret_key) {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "healthion-static",
        ));
    }

    loader.load().await
}
