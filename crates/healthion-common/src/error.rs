//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, HealthionError>;

/// Errors raised by shared helpers and configuration loading
#[derive(Error, Debug)]
pub enum HealthionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidSetting { name: String, value: String },
}

impl HealthionError {
    /// Build a configuration error from any message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Build an error for an environment setting that failed to parse
    pub fn invalid_setting(name: &str, value: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name: name.to_string(),
            value: value.into(),
        }
    }
}
