//! Transaction-scoped write interface of the pipeline
//!
//! An [`ImportStore`] opens one [`ImportSession`] per file. Everything a
//! session writes becomes visible on [`ImportSession::commit`] and is
//! discarded on [`ImportSession::rollback`] (or when the session is dropped).
//!
//! The first statement of every session is a claim on the file's
//! [`IdempotencyKey`]. A claim on a key another open session holds waits
//! until that session finishes; a claim on a committed key reports `false`.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::models::{IdempotencyKey, NewRecord, NewStatistic, NewWorkout};

pub mod counting;
pub mod memory;
pub mod postgres;

pub use counting::{CountingImportStore, CountingSnapshot};
pub use memory::{MemoryImportStore, MemorySnapshot};
pub use postgres::PgImportStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// Claim row recorded for one imported object version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportClaim {
    pub key: IdempotencyKey,
    pub bucket: String,
    pub object_key: String,
    pub user_id: Uuid,
}

#[async_trait]
pub trait ImportStore: Send + Sync {
    /// Open a new transaction
    async fn begin(&self) -> Result<Box<dyn ImportSession>, StoreError>;
}

#[async_trait]
pub trait ImportSession: Send {
    /// Claim an idempotency key; `false` when a committed import already holds it
    async fn claim(&mut self, claim: &ImportClaim) -> Result<bool, StoreError>;

    async fn insert_record(&mut self, record: &NewRecord) -> Result<(), StoreError>;

    async fn insert_workout(&mut self, workout: &NewWorkout) -> Result<(), StoreError>;

    async fn insert_statistic(&mut self, statistic: &NewStatistic) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
