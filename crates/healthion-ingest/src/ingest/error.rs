//! Errors of one orchestration run

use healthion_common::HealthionError;
use thiserror::Error;

use super::archiver::ArchiveError;
use super::parser::ParseError;
use super::persist::PersistError;
use super::store::StoreError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid user id '{0}': expected a UUID")]
    InvalidUserId(String),

    #[error("Failed to prepare scratch directory: {0}")]
    Scratch(#[source] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("XML parsing failed: {0}")]
    Parse(#[from] ParseError),

    #[error("XML import failed: {0}")]
    Persist(#[from] PersistError),

    #[error("Import transaction failed: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Checksum failed: {0}")]
    Checksum(#[from] HealthionError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
