//! Classified rows to typed entities to the store
//!
//! Rows are written one at a time through the session. The first row that
//! cannot be converted or written aborts the chunk; the caller rolls back.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::coerce::{coerce_decimal, coerce_text, coerce_timestamp, truncate};
use super::models::{ChunkKind, NewRecord, NewStatistic, NewWorkout, Row, TabularChunk};
use super::store::{ImportSession, StoreError};

/// Column width limits, in characters
pub const TYPE_MAX_CHARS: usize = 50;
pub const SOURCE_MAX_CHARS: usize = 100;
pub const UNIT_MAX_CHARS: usize = 10;

const DEFAULT_WORKOUT_TYPE: &str = "Unknown Workout";

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Row {row} of <{element}> could not be converted: {reason}")]
    RowConstruction {
        element: String,
        row: usize,
        reason: String,
        persisted: usize,
    },

    #[error("Row {row} of <{element}> could not be written: {source}")]
    Write {
        element: String,
        row: usize,
        persisted: usize,
        #[source]
        source: StoreError,
    },
}

impl PersistError {
    /// Rows of the chunk written before the failure
    pub fn persisted(&self) -> usize {
        match self {
            PersistError::RowConstruction { persisted, .. } => *persisted,
            PersistError::Write { persisted, .. } => *persisted,
        }
    }
}

enum Entity {
    Record(NewRecord),
    Workout(NewWorkout),
    Statistic(NewStatistic),
}

/// Persist every row of a classified chunk, returning the number written
pub async fn persist(
    session: &mut dyn ImportSession,
    chunk: &TabularChunk,
    kind: ChunkKind,
    user_id: Uuid,
) -> Result<usize, PersistError> {
    match kind {
        ChunkKind::Unknown => {
            debug!(element = chunk.element(), rows = chunk.len(), "Skipping unclassified chunk");
            return Ok(0);
        },
        ChunkKind::Record if !chunk.has_column("type") => {
            warn!(element = chunk.element(), rows = chunk.len(), "Record chunk without a type column");
            return Ok(0);
        },
        _ => {},
    }

    let mut persisted = 0;

    for (index, row) in chunk.rows().iter().enumerate() {
        let entity = match build(kind, row, user_id) {
            Ok(Some(entity)) => entity,
            Ok(None) => continue,
            Err(reason) => {
                error!(
                    element = chunk.element(),
                    kind = %kind,
                    row_index = index,
                    row = %row,
                    reason = %reason,
                    "Failed to build {} row", kind
                );
                return Err(PersistError::RowConstruction {
                    element: chunk.element().to_string(),
                    row: index,
                    reason,
                    persisted,
                });
            },
        };

        if let Err(source) = write(session, &entity).await {
            error!(
                element = chunk.element(),
                kind = %kind,
                row_index = index,
                row = %row,
                error = %source,
                "Failed to write {} row", kind
            );
            return Err(PersistError::Write {
                element: chunk.element().to_string(),
                row: index,
                persisted,
                source,
            });
        }

        persisted += 1;
    }

    debug!(element = chunk.element(), kind = %kind, persisted, "Persisted chunk");
    Ok(persisted)
}

fn build(kind: ChunkKind, row: &Row, user_id: Uuid) -> Result<Option<Entity>, String> {
    let entity = match kind {
        ChunkKind::Record => Entity::Record(build_record(row, user_id)?),
        ChunkKind::Workout => Entity::Workout(build_workout(row, user_id)?),
        ChunkKind::Statistic => Entity::Statistic(build_statistic(row, user_id)?),
        ChunkKind::Unknown => return Ok(None),
    };
    Ok(Some(entity))
}

async fn write(session: &mut dyn ImportSession, entity: &Entity) -> Result<(), StoreError> {
    match entity {
        Entity::Record(record) => session.insert_record(record).await,
        Entity::Workout(workout) => session.insert_workout(workout).await,
        Entity::Statistic(statistic) => session.insert_statistic(statistic).await,
    }
}

fn build_record(row: &Row, user_id: Uuid) -> Result<NewRecord, String> {
    Ok(NewRecord {
        user_id,
        record_type: text(row, "type", TYPE_MAX_CHARS),
        source_version: text(row, "sourceVersion", SOURCE_MAX_CHARS),
        source_name: text(row, "sourceName", SOURCE_MAX_CHARS),
        device_id: text(row, "device", SOURCE_MAX_CHARS),
        start_date: timestamp(row, "startDate")?,
        end_date: timestamp(row, "endDate")?,
        creation_date: timestamp(row, "creationDate")?,
        unit: text(row, "unit", UNIT_MAX_CHARS),
        value: coerce_decimal(row.get("value")),
    })
}

fn build_workout(row: &Row, user_id: Uuid) -> Result<NewWorkout, String> {
    let workout_type = match row.get("type") {
        Some(value) => truncate(&value.to_string(), TYPE_MAX_CHARS),
        None => DEFAULT_WORKOUT_TYPE.to_string(),
    };

    Ok(NewWorkout {
        user_id,
        workout_type,
        duration: coerce_decimal(row.get("duration")),
        duration_unit: text(row, "durationUnit", UNIT_MAX_CHARS),
        source_name: text(row, "sourceName", SOURCE_MAX_CHARS),
        start_date: timestamp(row, "startDate")?,
        end_date: timestamp(row, "endDate")?,
        creation_date: timestamp(row, "creationDate")?,
    })
}

fn build_statistic(row: &Row, user_id: Uuid) -> Result<NewStatistic, String> {
    Ok(NewStatistic {
        user_id,
        statistic_type: text(row, "type", TYPE_MAX_CHARS),
        start_date: timestamp(row, "startDate")?,
        end_date: timestamp(row, "endDate")?,
        creation_date: timestamp(row, "creationDate")?,
        sum: coerce_decimal(row.get("sum")),
        average: coerce_decimal(row.get("average")),
        maximum: coerce_decimal(row.get("maximum")),
        minimum: coerce_decimal(row.get("minimum")),
        unit: text(row, "unit", UNIT_MAX_CHARS),
    })
}

fn text(row: &Row, column: &str, max_chars: usize) -> String {
    truncate(&coerce_text(row.get(column)), max_chars)
}

fn timestamp(row: &Row, column: &str) -> Result<DateTime<Utc>, String> {
    match row.get(column) {
        None => Err(format!("missing {}", column)),
        Some(value) => coerce_timestamp(Some(value))
            .ok_or_else(|| format!("invalid {} '{}'", column, value)),
    }
}
