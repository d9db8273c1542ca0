//! Healthion Ingest Library
//!
//! Queue-driven ingestion of health-tracking XML exports.
//!
//! # Overview
//!
//! Exports are uploaded to S3 under `{user_id}/raw/`. Each upload emits an
//! S3 event notification to SQS; the consumer polls those notifications and
//! hands each file to a worker pool, which runs the ingestion pipeline:
//!
//! - **Streaming parse**: the export is read in bounded chunks of rows
//! - **Classification**: each chunk is routed by its column signature
//! - **Transactional persistence**: one PostgreSQL transaction per file,
//!   deduplicated through an idempotency claim
//! - **Archival**: a database dump is uploaded to `{user_id}/processed/`
//!
//! # Modules
//!
//! - [`config`]: environment-based configuration
//! - [`db`]: connection pool and migrations
//! - [`storage`]: S3 object storage
//! - [`queue`]: SQS message source
//! - [`ingest`]: the pipeline itself
//!
//! # Example
//!
//! ```no_run
//! use healthion_ingest::ingest::{import_file, CountingImportStore, ParserConfig};
//! use healthion_ingest::ingest::{IdempotencyKey, ImportClaim};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = CountingImportStore::new();
//!     let claim = ImportClaim {
//!         key: IdempotencyKey::new("local", "export.xml", "dry-run"),
//!         bucket: "local".to_string(),
//!         object_key: "export.xml".to_string(),
//!         user_id: uuid::Uuid::nil(),
//!     };
//!     let outcome =
//!         import_file(&store, &ParserConfig::default(), Path::new("export.xml"), &claim).await?;
//!     println!("{}", outcome.message());
//!     Ok(())
//! }
//! ```

pub mod aws;
pub mod config;
pub mod db;
pub mod ingest;
pub mod queue;
pub mod storage;

pub use config::Config;
pub use ingest::{FileNotification, IngestError, IngestionOrchestrator, TaskResult};
