//! Chunk classification by column signature

use super::models::{ChunkKind, TabularChunk};

const STATISTIC_COLUMNS: [&str; 4] = ["sum", "average", "maximum", "minimum"];
const WORKOUT_COLUMNS: [&str; 2] = ["duration", "durationUnit"];
const RECORD_COLUMNS: [&str; 1] = ["value"];

/// Classify a chunk from its column names; the first matching rule wins
pub fn classify(chunk: &TabularChunk) -> ChunkKind {
    if chunk.is_empty() {
        return ChunkKind::Unknown;
    }

    if chunk.has_columns(&STATISTIC_COLUMNS) {
        ChunkKind::Statistic
    } else if chunk.has_columns(&WORKOUT_COLUMNS) {
        ChunkKind::Workout
    } else if chunk.has_columns(&RECORD_COLUMNS) {
        ChunkKind::Record
    } else {
        ChunkKind::Unknown
    }
}
