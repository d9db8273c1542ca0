use healthion_common::{HealthionError, Result};
use serde::{Deserialize, Serialize};

use crate::config::{env_opt, env_or};

/// SQS long-poll limits (hard limits of the service)
pub const MAX_BATCH_SIZE: i32 = 10;
pub const MAX_WAIT_TIME_SECS: i32 = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue receiving S3 event notifications; required by the polling commands
    pub queue_url: Option<String>,
    pub endpoint: Option<String>,
    pub max_messages: i32,
    pub wait_time_secs: i32,
    /// Pause between consecutive polls of the repeated-poll scheduler
    pub poll_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_url: None,
            endpoint: None,
            max_messages: MAX_BATCH_SIZE,
            wait_time_secs: MAX_WAIT_TIME_SECS,
            poll_interval_secs: 5,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            queue_url: env_opt("SQS_QUEUE_URL"),
            endpoint: env_opt("SQS_ENDPOINT"),
            max_messages: env_or("SQS_MAX_MESSAGES", defaults.max_messages),
            wait_time_secs: env_or("SQS_WAIT_TIME_SECS", defaults.wait_time_secs),
            poll_interval_secs: env_or("SQS_POLL_INTERVAL_SECS", defaults.poll_interval_secs),
        }
    }

    /// The queue URL, or a configuration error when it is not set
    pub fn require_queue_url(&self) -> Result<&str> {
        self.queue_url
            .as_deref()
            .ok_or_else(|| HealthionError::config("SQS_QUEUE_URL must be set to poll the queue"))
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.max_messages) {
            return Err(HealthionError::invalid_setting(
                "SQS_MAX_MESSAGES",
                self.max_messages.to_string(),
            ));
        }
        if !(0..=MAX_WAIT_TIME_SECS).contains(&self.wait_time_secs) {
            return Err(HealthionError::invalid_setting(
                "SQS_WAIT_TIME_SECS",
                self.wait_time_secs.to_string(),
            ));
        }
        Ok(())
    }
}
