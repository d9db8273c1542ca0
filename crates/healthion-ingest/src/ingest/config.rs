//! Ingestion pipeline configuration
//!
//! Loaded from `INGEST_*` environment variables.

use healthion_common::{HealthionError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{env_opt, env_or};

/// Elements of an export whose attributes become tabular rows
pub const DEFAULT_ROW_ELEMENTS: [&str; 3] = ["Record", "Workout", "WorkoutStatistics"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestSettings {
    /// Maximum rows per parsed chunk (default: 1000)
    pub chunk_size: usize,
    pub row_elements: Vec<String>,
    /// Concurrent orchestration runs (default: 4)
    pub workers: usize,
    /// Pending runs buffered ahead of the workers (default: 64)
    pub queue_capacity: usize,
    /// Root for per-run scratch directories; system temp dir when unset
    pub temp_dir: Option<PathBuf>,
    /// Dump tool executable (default: `pg_dump`)
    pub dump_program: String,
    /// Dump subprocess timeout; `None` waits indefinitely
    pub dump_timeout_secs: Option<u64>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            row_elements: DEFAULT_ROW_ELEMENTS.iter().map(|s| s.to_string()).collect(),
            workers: 4,
            queue_capacity: 64,
            temp_dir: None,
            dump_program: "pg_dump".to_string(),
            dump_timeout_secs: Some(1800),
        }
    }
}

impl IngestSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let dump_timeout_secs = match env_opt("INGEST_DUMP_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(secs),
                Err(_) => {
                    tracing::warn!(value = %raw, "Ignoring unparseable INGEST_DUMP_TIMEOUT_SECS");
                    defaults.dump_timeout_secs
                },
            },
            None => defaults.dump_timeout_secs,
        };

        Self {
            chunk_size: env_or("INGEST_CHUNK_SIZE", defaults.chunk_size),
            row_elements: defaults.row_elements,
            workers: env_or("INGEST_WORKERS", defaults.workers),
            queue_capacity: env_or("INGEST_QUEUE_CAPACITY", defaults.queue_capacity),
            temp_dir: env_opt("INGEST_TEMP_DIR").map(PathBuf::from),
            dump_program: env_opt("INGEST_DUMP_PROGRAM").unwrap_or(defaults.dump_program),
            dump_timeout_secs,
        }
    }

    /// Scratch root for orchestration runs
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn dump_timeout(&self) -> Option<Duration> {
        self.dump_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(HealthionError::invalid_setting("INGEST_CHUNK_SIZE", "0"));
        }
        if self.workers == 0 {
            return Err(HealthionError::invalid_setting("INGEST_WORKERS", "0"));
        }
        if self.queue_capacity == 0 {
            return Err(HealthionError::invalid_setting("INGEST_QUEUE_CAPACITY", "0"));
        }
        if self.row_elements.is_empty() {
            return Err(HealthionError::config("at least one row element is required"));
        }
        if self.dump_program.trim().is_empty() {
            return Err(HealthionError::invalid_setting("INGEST_DUMP_PROGRAM", ""));
        }
        Ok(())
    }
}
