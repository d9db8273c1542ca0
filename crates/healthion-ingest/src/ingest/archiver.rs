//! Database dump and archive upload
//!
//! After a successful import the whole database is dumped by an external
//! tool (`pg_dump`) into the run's scratch directory and uploaded next to
//! the source object as `{user_id}/processed/{stem}.sql`.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::storage::{ObjectStore, StorageError};

pub const ARCHIVE_CONTENT_TYPE: &str = "application/sql";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Database dump failed: {0}")]
    Dump(String),

    #[error("Archive upload failed: {0}")]
    Upload(#[from] StorageError),
}

/// Produces a dump file of the database
#[async_trait]
pub trait DumpTool: Send + Sync {
    async fn dump(&self, output: &Path) -> Result<(), ArchiveError>;

    /// Extension of produced files
    fn extension(&self) -> &str {
        "sql"
    }
}

/// `pg_dump <database_url> --file=<output>` as a subprocess
#[derive(Clone)]
pub struct PgDumpTool {
    program: String,
    database_url: String,
    timeout: Option<Duration>,
}

impl PgDumpTool {
    pub fn new(program: impl Into<String>, database_url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            database_url: database_url.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

// The connection string carries credentials.
impl fmt::Debug for PgDumpTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgDumpTool")
            .field("program", &self.program)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DumpTool for PgDumpTool {
    async fn dump(&self, output: &Path) -> Result<(), ArchiveError> {
        debug!(program = %self.program, output = %output.display(), "Starting database dump");

        let run = Command::new(&self.program)
            .arg(&self.database_url)
            .arg(format!("--file={}", output.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                ArchiveError::Dump(format!("{} timed out after {:?}", self.program, limit))
            })?,
            None => run.await,
        };

        let output_status = result
            .map_err(|e| ArchiveError::Dump(format!("failed to start {}: {}", self.program, e)))?;

        if !output_status.status.success() {
            let stderr = String::from_utf8_lossy(&output_status.stderr);
            return Err(ArchiveError::Dump(format!(
                "{} exited with {}: {}",
                self.program,
                output_status.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Key of the archive for an uploaded file: `{user_id}/processed/{stem}.{ext}`
pub fn archive_key(user_id: &str, filename: &str, ext: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "export".to_string());
    format!("{}/processed/{}.{}", user_id, stem, ext)
}

pub struct Archiver {
    storage: Arc<dyn ObjectStore>,
    dump_tool: Arc<dyn DumpTool>,
}

impl Archiver {
    pub fn new(storage: Arc<dyn ObjectStore>, dump_tool: Arc<dyn DumpTool>) -> Self {
        Self { storage, dump_tool }
    }

    pub fn extension(&self) -> &str {
        self.dump_tool.extension()
    }

    /// Dump the database to `dump_path` and upload it to `bucket/output_key`
    #[instrument(skip(self, dump_path))]
    pub async fn dump_and_upload(
        &self,
        bucket: &str,
        output_key: &str,
        dump_path: &Path,
    ) -> Result<String, ArchiveError> {
        self.dump_tool.dump(dump_path).await?;

        let size = self
            .storage
            .upload_file(bucket, output_key, dump_path, Some(ARCHIVE_CONTENT_TYPE))
            .await?;

        info!(bucket, output_key, size, "Archive uploaded");
        Ok(output_key.to_string())
    }
}
