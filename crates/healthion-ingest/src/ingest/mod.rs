//! Health export ingestion pipeline
//!
//! # Architecture
//!
//! - **consumer**: long-polls S3 event notifications and dispatches runs
//! - **worker**: pool of tasks executing orchestration runs
//! - **scheduler**: repeated polling with a time budget and cancellation
//! - **orchestrator**: one file end to end (download, import, dump, upload)
//! - **parser**: streaming XML to bounded tabular chunks
//! - **classify**: chunk column signature to record kind
//! - **persist**: rows to typed entities inside the import transaction
//! - **coerce**: loosely-typed cells to decimals, timestamps and bounded text
//! - **store**: transaction-scoped writes (PostgreSQL and in-memory)
//! - **archiver**: database dump and archive upload
//! - **uploads**: presigned uploads and the raw key convention
//!
//! Control flow is strictly forward:
//!
//! ```text
//! QueueConsumer ─▶ WorkerPool ─▶ IngestionOrchestrator ─▶ ChunkedXmlParser
//!                                         │                     │
//!                                         │                classify ─▶ persist ─▶ ImportSession
//!                                         └─▶ Archiver ─▶ ObjectStore
//! ```

pub mod archiver;
pub mod classify;
pub mod coerce;
pub mod config;
pub mod consumer;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod persist;
pub mod scheduler;
pub mod store;
pub mod uploads;
pub mod worker;

pub use archiver::{archive_key, ArchiveError, Archiver, DumpTool, PgDumpTool};
pub use classify::classify;
pub use config::IngestSettings;
pub use consumer::{PollSummary, QueueConsumer};
pub use error::IngestError;
pub use models::{
    ChunkKind, FileNotification, IdempotencyKey, ImportOutcome, ImportStats, Row, Scalar,
    TabularChunk, TaskResult, TaskStatus,
};
pub use orchestrator::{import_file, IngestionOrchestrator};
pub use parser::{ChunkedXmlParser, ParseError, ParserConfig};
pub use persist::{persist, PersistError};
pub use scheduler::{PollScheduler, Poller, ScheduleSummary};
pub use store::{
    CountingImportStore, ImportClaim, ImportSession, ImportStore, MemoryImportStore, PgImportStore,
    StoreError,
};
pub use uploads::{file_key, PresignedUpload, PresignedUploadRequest, UploadError};
pub use worker::{DispatchError, TaskDispatcher, TaskRunner, WorkerPool};
