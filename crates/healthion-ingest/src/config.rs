//! Configuration management
//!
//! All settings come from the environment (after loading `.env` through
//! `dotenvy`). Each section has its own `from_env` so binaries and tests can
//! build only what they need.

use healthion_common::Result;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{
    db::DbConfig, ingest::config::IngestSettings, queue::config::QueueConfig,
    storage::config::StorageConfig,
};

/// Complete runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DbConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub ingest: IngestSettings,
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DbConfig::from_env(),
            storage: StorageConfig::from_env(),
            queue: QueueConfig::from_env(),
            ingest: IngestSettings::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.storage.validate()?;
        self.queue.validate()?;
        self.ingest.validate()?;
        Ok(())
    }
}

/// Read an environment variable, falling back to `default` when unset.
///
/// A value that is set but does not parse is logged and replaced by the default.
pub(crate) fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(setting = name, value = %raw, "Ignoring unparseable setting");
                default
            },
        },
        Err(_) => default,
    }
}

/// Read an optional, non-empty environment variable
pub(crate) fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
