//! Shared fakes for pipeline integration tests
//!
//! In-memory stand-ins for object storage, the dump tool, the queue and the
//! dispatcher, plus helpers to assemble an orchestrator around them.

#![allow(dead_code)]

use async_trait::async_trait;
use healthion_ingest::ingest::{
    ArchiveError, Archiver, DispatchError, DumpTool, FileNotification, IngestSettings,
    IngestionOrchestrator, MemoryImportStore, TaskDispatcher,
};
use healthion_ingest::queue::{MessageSource, QueueError, QueueMessage};
use healthion_ingest::storage::{ObjectInfo, ObjectStore, StorageError};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const BUCKET: &str = "healthion-uploads";

/// Export with two records and one workout
pub const EXPORT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<HealthData locale="en_US">
 <ExportDate value="2024-01-02 08:00:00 +0100"/>
 <Record type="HKQuantityTypeIdentifierHeartRate" sourceName="Watch" unit="count/min" value="72" startDate="2024-01-01 10:00:00 +0100" endDate="2024-01-01 10:00:00 +0100" creationDate="2024-01-01 10:00:01 +0100"/>
 <Record type="HKQuantityTypeIdentifierBodyMass" sourceName="Scale" unit="kg" value="70.5" startDate="2024-01-01 11:00:00 +0100" endDate="2024-01-01 11:00:00 +0100" creationDate="2024-01-01 11:00:01 +0100"/>
 <Workout type="HKWorkoutActivityTypeRunning" duration="30.5" durationUnit="min" sourceName="Watch" startDate="2024-01-01 07:00:00 +0100" endDate="2024-01-01 07:30:30 +0100" creationDate="2024-01-01 07:31:00 +0100"/>
</HealthData>
"#;

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,healthion_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Export with `count` records; the record at `bad_index` has no end date
pub fn records_xml(count: usize, bad_index: Option<usize>) -> String {
    let mut xml = String::from("<HealthData>\n");
    for i in 0..count {
        let end = if Some(i) == bad_index {
            String::new()
        } else {
            format!(r#" endDate="2024-01-01 10:{:02}:00 +0000""#, i)
        };
        xml.push_str(&format!(
            r#" <Record type="HKQuantityTypeIdentifierStepCount" unit="count" value="{}" startDate="2024-01-01 10:{:02}:00 +0000"{} creationDate="2024-01-01 11:00:00 +0000"/>"#,
            i * 10,
            i,
            end
        ));
        xml.push('\n');
    }
    xml.push_str("</HealthData>\n");
    xml
}

pub fn raw_key(user_id: Uuid) -> String {
    format!("{}/raw/export.xml", user_id)
}

// ============================================================================
// Object storage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<(String, String), (Vec<u8>, Option<String>)>>,
    uploads: Mutex<Vec<Upload>>,
    downloads: AtomicUsize,
    fail_uploads: AtomicBool,
}

impl FakeObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, bucket: &str, key: &str, body: &str, etag: Option<&str>) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            (body.as_bytes().to_vec(), etag.map(str::to_string)),
        );
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<ObjectInfo, StorageError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let object = self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned();

        let (body, etag) = object.ok_or_else(|| StorageError::Request {
            operation: "get_object",
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: "NoSuchKey".to_string(),
        })?;

        tokio::fs::write(dest, &body).await?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: body.len() as u64,
            etag,
            version_id: None,
        })
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        content_type: Option<&str>,
    ) -> Result<u64, StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Request {
                operation: "put_object",
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "SlowDown".to_string(),
            });
        }

        let body = tokio::fs::read(src).await?;
        let size = body.len() as u64;
        self.uploads.lock().unwrap().push(Upload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.map(str::to_string),
            body,
        });
        Ok(size)
    }
}

// ============================================================================
// Dump tool
// ============================================================================

#[derive(Default)]
pub struct FakeDumpTool {
    calls: AtomicUsize,
    fail: AtomicBool,
    paths: Mutex<Vec<PathBuf>>,
}

impl FakeDumpTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl DumpTool for FakeDumpTool {
    async fn dump(&self, output: &Path) -> Result<(), ArchiveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().push(output.to_path_buf());

        if self.fail.load(Ordering::SeqCst) {
            return Err(ArchiveError::Dump(
                "pg_dump: error: connection to server failed".to_string(),
            ));
        }

        tokio::fs::write(output, b"-- PostgreSQL database dump\n")
            .await
            .map_err(|e| ArchiveError::Dump(e.to_string()))
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Default)]
pub struct FakeQueue {
    pending: Mutex<VecDeque<QueueMessage>>,
    deleted: Mutex<Vec<String>>,
    fail_receive: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enqueue a body, returning its receipt handle
    pub fn push(&self, body: impl Into<String>) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let receipt_handle = format!("receipt-{}", id);
        self.pending.lock().unwrap().push_back(QueueMessage {
            message_id: Some(format!("message-{}", id)),
            receipt_handle: receipt_handle.clone(),
            body: body.into(),
        });
        receipt_handle
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn set_fail_receive(&self, fail: bool) {
        self.fail_receive.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageSource for FakeQueue {
    async fn receive(
        &self,
        max_messages: i32,
        _wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        if self.fail_receive.load(Ordering::SeqCst) {
            return Err(QueueError::Receive("service unavailable".to_string()));
        }

        let mut pending = self.pending.lock().unwrap();
        let take = (max_messages.max(0) as usize).min(pending.len());
        Ok(pending.drain(..take).collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.deleted.lock().unwrap().push(receipt_handle.to_string());
        Ok(())
    }
}

/// S3 event body with one record per key
pub fn s3_event(bucket: &str, keys: &[impl AsRef<str>]) -> String {
    let records: Vec<serde_json::Value> = keys
        .iter()
        .map(|key| {
            let key = key.as_ref();
            serde_json::json!({
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": bucket },
                    "object": { "key": key, "size": 1024, "eTag": "0123456789abcdef" }
                }
            })
        })
        .collect();

    serde_json::json!({ "Records": records }).to_string()
}

// ============================================================================
// Dispatcher
// ============================================================================

#[derive(Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<FileNotification>>,
    failure: Mutex<Option<DispatchError>>,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(error: DispatchError) -> Arc<Self> {
        let dispatcher = Self::default();
        *dispatcher.failure.lock().unwrap() = Some(error);
        Arc::new(dispatcher)
    }

    pub fn dispatched(&self) -> Vec<FileNotification> {
        self.dispatched.lock().unwrap().clone()
    }
}

impl TaskDispatcher for RecordingDispatcher {
    fn dispatch(&self, notification: FileNotification) -> Result<(), DispatchError> {
        if let Some(error) = *self.failure.lock().unwrap() {
            return Err(error);
        }
        self.dispatched.lock().unwrap().push(notification);
        Ok(())
    }
}

// ============================================================================
// Orchestrator assembly
// ============================================================================

pub struct Harness {
    pub storage: Arc<FakeObjectStore>,
    pub dump: Arc<FakeDumpTool>,
    pub store: MemoryImportStore,
    pub temp_root: tempfile::TempDir,
    pub orchestrator: Arc<IngestionOrchestrator>,
}

impl Harness {
    pub fn new(store: MemoryImportStore, chunk_size: usize) -> Self {
        let storage = FakeObjectStore::new();
        let dump = FakeDumpTool::new();
        let temp_root = tempfile::tempdir().unwrap();

        let settings = IngestSettings {
            chunk_size,
            temp_dir: Some(temp_root.path().to_path_buf()),
            ..IngestSettings::default()
        };

        let archiver = Archiver::new(storage.clone(), dump.clone());
        let orchestrator = Arc::new(IngestionOrchestrator::new(
            storage.clone(),
            Arc::new(store.clone()),
            archiver,
            &settings,
        ));

        Self {
            storage,
            dump,
            store,
            temp_root,
            orchestrator,
        }
    }

    /// Entries left under the scratch root
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.temp_root.path()).unwrap().count()
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with migrations applied
pub struct TestPostgres {
    _container: testcontainers::ContainerAsync<testcontainers_modules::postgres::Postgres>,
    pool: sqlx::PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> anyhow::Result<Self> {
        use anyhow::Context;
        use testcontainers::core::IntoContainerPort;
        use testcontainers::runners::AsyncRunner;

        tracing::info!("Starting PostgreSQL test container...");

        let container = testcontainers_modules::postgres::Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

pub fn is_docker_available() -> bool {
    std::process::Command::new("docker")
        .arg("info")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Return early from a test when Docker is not available
#[macro_export]
macro_rules! skip_if_no_docker {
    () => {
        if !$crate::common::is_docker_available() {
            eprintln!("Skipping test: Docker is not available");
            return;
        }
    };
}
