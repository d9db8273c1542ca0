//! One uploaded file, end to end
//!
//! A run downloads the object into a private scratch directory, imports it
//! inside a single transaction, dumps the database and uploads the dump next
//! to the source object. The scratch directory is removed when the run ends,
//! whatever the outcome.
//!
//! ```text
//! Acquire ──▶ Parse + Persist (one transaction) ──▶ Dump ──▶ Upload ──▶ Cleanup
//! ```
//!
//! The transaction first claims the object's idempotency key. A redelivered
//! notification for an already committed object skips the import and only
//! refreshes the archive.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::archiver::{archive_key, Archiver};
use super::classify::classify;
use super::config::IngestSettings;
use super::error::IngestError;
use super::models::{FileNotification, IdempotencyKey, ImportOutcome, ImportStats, TaskResult};
use super::parser::{ChunkedXmlParser, ParserConfig};
use super::persist::persist;
use super::store::{ImportClaim, ImportSession, ImportStore};
use super::worker::TaskRunner;
use crate::storage::{ObjectInfo, ObjectStore};

const SOURCE_FILE_NAME: &str = "source.xml";
const MAX_KEY_PREFIX_CHARS: usize = 48;

pub struct IngestionOrchestrator {
    storage: Arc<dyn ObjectStore>,
    store: Arc<dyn ImportStore>,
    archiver: Archiver,
    parser_config: ParserConfig,
    temp_root: PathBuf,
}

impl IngestionOrchestrator {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        store: Arc<dyn ImportStore>,
        archiver: Archiver,
        settings: &IngestSettings,
    ) -> Self {
        Self {
            storage,
            store,
            archiver,
            parser_config: ParserConfig::from(settings),
            temp_root: settings.temp_root(),
        }
    }

    /// Run the pipeline for one notification. Failures are reported in the result.
    pub async fn run(&self, notification: &FileNotification) -> TaskResult {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "ingest_run",
            bucket = %notification.bucket,
            key = %notification.key,
            %run_id
        );

        async move {
            let started = Instant::now();
            info!("Starting orchestration run");

            match self.execute(notification, run_id).await {
                Ok((output_key, outcome)) => {
                    info!(
                        output_key = %output_key,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "{}",
                        outcome.message()
                    );
                    TaskResult::success(notification, output_key, &outcome)
                },
                Err(e) => {
                    error!(
                        error = %e,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Orchestration run failed"
                    );
                    TaskResult::failed(notification, e)
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        notification: &FileNotification,
        run_id: Uuid,
    ) -> Result<(String, ImportOutcome), IngestError> {
        let user = notification.user_id();
        let user_id =
            Uuid::parse_str(&user).map_err(|_| IngestError::InvalidUserId(user.clone()))?;

        // Acquire
        let scratch = self.scratch_dir(run_id, &notification.key).await?;
        let source = scratch.path().join(SOURCE_FILE_NAME);
        let object = self
            .storage
            .download_to_file(&notification.bucket, &notification.key, &source)
            .await?;

        if let (Some(notified), Some(downloaded)) =
            (notification.version.as_deref(), object.version())
        {
            if notified != downloaded {
                warn!(notified, downloaded, "Object changed since notification");
            }
        }

        let claim = ImportClaim {
            key: idempotency_key(notification, &object, &source).await?,
            bucket: notification.bucket.clone(),
            object_key: notification.key.clone(),
            user_id,
        };

        // Parse + persist
        let outcome = import_file(self.store.as_ref(), &self.parser_config, &source, &claim).await?;

        // Dump + upload
        let output_key = archive_key(&user, notification.filename(), self.archiver.extension());
        let dump_path = scratch
            .path()
            .join(format!("dump.{}", self.archiver.extension()));
        self.archiver
            .dump_and_upload(&notification.bucket, &output_key, &dump_path)
            .await?;

        Ok((output_key, outcome))
    }

    async fn scratch_dir(&self, run_id: Uuid, key: &str) -> Result<TempDir, IngestError> {
        tokio::fs::create_dir_all(&self.temp_root)
            .await
            .map_err(IngestError::Scratch)?;

        let prefix = format!("ingest-{}-{}-", run_id.simple(), sanitize_key(key));
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&self.temp_root)
            .map_err(IngestError::Scratch)?;

        debug!(path = %dir.path().display(), "Created scratch directory");
        Ok(dir)
    }
}

#[async_trait]
impl TaskRunner for IngestionOrchestrator {
    async fn run(&self, notification: &FileNotification) -> TaskResult {
        IngestionOrchestrator::run(self, notification).await
    }
}

/// Parse a local export and persist it inside one transaction.
///
/// The transaction is committed only when every chunk was persisted; any
/// failure rolls it back.
pub async fn import_file(
    store: &dyn ImportStore,
    parser_config: &ParserConfig,
    path: &Path,
    claim: &ImportClaim,
) -> Result<ImportOutcome, IngestError> {
    let mut session = store.begin().await?;

    match import_in_session(session.as_mut(), parser_config, path, claim).await {
        Ok(ImportOutcome::AlreadyImported) => {
            if let Err(e) = session.rollback().await {
                warn!(error = %e, "Failed to release transaction of a skipped import");
            }
            Ok(ImportOutcome::AlreadyImported)
        },
        Ok(outcome) => {
            session.commit().await?;
            Ok(outcome)
        },
        Err(e) => {
            if let Err(rollback_error) = session.rollback().await {
                warn!(error = %rollback_error, "Rollback failed");
            }
            Err(e)
        },
    }
}

async fn import_in_session(
    session: &mut dyn ImportSession,
    parser_config: &ParserConfig,
    path: &Path,
    claim: &ImportClaim,
) -> Result<ImportOutcome, IngestError> {
    if !session.claim(claim).await? {
        info!(key = %claim.key, "Object version already imported, skipping import");
        return Ok(ImportOutcome::AlreadyImported);
    }

    let mut parser = ChunkedXmlParser::from_path(path, parser_config.clone()).await?;
    let mut stats = ImportStats::default();

    while let Some(chunk) = parser.next_chunk().await? {
        if chunk.is_empty() {
            continue;
        }

        let kind = classify(&chunk);
        let persisted = persist(session, &chunk, kind, claim.user_id).await?;
        stats.add_chunk(kind, persisted);

        debug!(
            chunk = stats.chunks_processed,
            element = chunk.element(),
            kind = %kind,
            persisted,
            "Processed chunk"
        );
    }

    info!(
        records = stats.records,
        workouts = stats.workouts,
        statistics = stats.statistics,
        chunks = stats.chunks_processed,
        "Import complete"
    );

    Ok(ImportOutcome::Imported(stats))
}

/// Key of the downloaded content: its version id or ETag, else a content hash.
/// The notification's version may be stale after an overwrite.
async fn idempotency_key(
    notification: &FileNotification,
    object: &ObjectInfo,
    source: &Path,
) -> Result<IdempotencyKey, IngestError> {
    let version = match object.version() {
        Some(version) => version.to_string(),
        None => {
            let path = source.to_path_buf();
            let digest =
                tokio::task::spawn_blocking(move || healthion_common::checksum::sha256_file(&path))
                    .await??;
            format!("sha256:{}", digest)
        },
    };

    Ok(IdempotencyKey::new(&notification.bucket, &notification.key, &version))
}

/// File-name-safe form of an object key
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_KEY_PREFIX_CHARS)
        .collect()
}
