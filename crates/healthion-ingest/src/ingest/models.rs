//! Data model of the ingestion pipeline
//!
//! Chunks and rows are what the parser produces; `New*` entities are what the
//! persister writes; [`ImportStats`] and [`TaskResult`] describe one run.

use chrono::{DateTime, Utc};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use sqlx::types::BigDecimal;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// A loosely-typed cell value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Scalar {
    /// Infer the narrowest scalar for raw attribute text: integer, then float, then text
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Scalar::Integer(i);
        }
        if looks_numeric(trimmed) {
            if let Ok(f) = trimmed.parse::<f64>() {
                return Scalar::Float(f);
            }
        }
        Scalar::Text(raw.to_string())
    }
}

// `f64::from_str` also accepts "inf" and "NaN"; those stay text.
fn looks_numeric(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        && s.chars().any(|c| c.is_ascii_digit())
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Integer(i) => write!(f, "{}", i),
            // Debug keeps the decimal point: 17.0 prints as "17.0", not "17".
            Scalar::Float(x) => write!(f, "{:?}", x),
        }
    }
}

/// One tabular row: column name to value, in attribute order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, Scalar)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing an earlier value of the same name
    pub fn insert(&mut self, column: impl Into<String>, value: Scalar) {
        let column = column.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((column, value)),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: Scalar) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self.cells),
        }
    }
}

/// A bounded batch of sibling rows from one XML element name
#[derive(Debug, Clone, PartialEq)]
pub struct TabularChunk {
    element: String,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl TabularChunk {
    /// Build a chunk; the column set is the union of row columns in first-seen order
    pub fn new(element: impl Into<String>, rows: Vec<Row>) -> Self {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for row in &rows {
            for column in row.columns() {
                if seen.insert(column.to_string()) {
                    columns.push(column.to_string());
                }
            }
        }

        Self {
            element: element.into(),
            columns,
            rows,
        }
    }

    pub fn element(&self) -> &str {
        &self.element
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn has_columns(&self, required: &[&str]) -> bool {
        required.iter().all(|column| self.has_column(column))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Record kind implied by a chunk's column signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Record,
    Workout,
    Statistic,
    Unknown,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Record => "record",
            ChunkKind::Workout => "workout",
            ChunkKind::Statistic => "statistic",
            ChunkKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A health record reading (`health_records`)
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub user_id: Uuid,
    pub record_type: String,
    pub source_version: String,
    pub source_name: String,
    pub device_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub creation_date: DateTime<Utc>,
    pub unit: String,
    pub value: Option<BigDecimal>,
}

/// A workout summary (`xml_workouts`)
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkout {
    pub user_id: Uuid,
    pub workout_type: String,
    pub duration: Option<BigDecimal>,
    pub duration_unit: String,
    pub source_name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub creation_date: DateTime<Utc>,
}

/// Aggregated statistic of a workout (`workout_statistics`)
#[derive(Debug, Clone, PartialEq)]
pub struct NewStatistic {
    pub user_id: Uuid,
    pub statistic_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub creation_date: DateTime<Utc>,
    pub sum: Option<BigDecimal>,
    pub average: Option<BigDecimal>,
    pub maximum: Option<BigDecimal>,
    pub minimum: Option<BigDecimal>,
    pub unit: String,
}

/// Per-run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub records: u64,
    pub workouts: u64,
    pub statistics: u64,
    pub chunks_processed: u64,
}

impl ImportStats {
    /// Account for one non-empty chunk and the rows it persisted
    pub fn add_chunk(&mut self, kind: ChunkKind, persisted: usize) {
        let persisted = persisted as u64;
        match kind {
            ChunkKind::Record => self.records += persisted,
            ChunkKind::Workout => self.workouts += persisted,
            ChunkKind::Statistic => self.statistics += persisted,
            ChunkKind::Unknown => {},
        }
        self.chunks_processed += 1;
    }

    pub fn rows(&self) -> u64 {
        self.records + self.workouts + self.statistics
    }

    pub fn summary(&self) -> String {
        format!(
            "XML import successful. Records: {}, Workouts: {}, Statistics: {}",
            self.records, self.workouts, self.statistics
        )
    }
}

/// Result of the parse-and-persist step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported(ImportStats),
    /// The same object version was committed by an earlier run
    AlreadyImported,
}

impl ImportOutcome {
    pub fn stats(&self) -> Option<ImportStats> {
        match self {
            ImportOutcome::Imported(stats) => Some(*stats),
            ImportOutcome::AlreadyImported => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ImportOutcome::Imported(stats) => stats.summary(),
            ImportOutcome::AlreadyImported => {
                "Object version already imported; archive refreshed".to_string()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failed,
}

/// Terminal outcome of one orchestration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub bucket: String,
    pub input_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ImportStats>,
}

impl TaskResult {
    pub fn success(
        notification: &FileNotification,
        output_key: String,
        outcome: &ImportOutcome,
    ) -> Self {
        Self {
            status: TaskStatus::Success,
            bucket: notification.bucket.clone(),
            input_key: notification.key.clone(),
            output_key: Some(output_key),
            user_id: notification.user_id(),
            message: Some(outcome.message()),
            error: None,
            stats: outcome.stats(),
        }
    }

    pub fn failed(notification: &FileNotification, error: impl fmt::Display) -> Self {
        Self {
            status: TaskStatus::Failed,
            bucket: notification.bucket.clone(),
            input_key: notification.key.clone(),
            output_key: None,
            user_id: notification.user_id(),
            message: None,
            error: Some(error.to_string()),
            stats: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// A file-arrival notification: one uploaded object to ingest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileNotification {
    pub bucket: String,
    pub key: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Object version or ETag reported by the storage event
    #[serde(default)]
    pub version: Option<String>,
}

impl FileNotification {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            user_id: None,
            version: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Explicit user id, or the first path segment of the key
    pub fn user_id(&self) -> String {
        match self.user_id.as_deref().filter(|u| !u.is_empty()) {
            Some(user_id) => user_id.to_string(),
            None => self.key.split('/').next().unwrap_or_default().to_string(),
        }
    }

    /// Last path segment of the key
    pub fn filename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Deduplication key of one object version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(bucket: &str, key: &str, version: &str) -> Self {
        Self(healthion_common::checksum::sha256_parts([bucket, key, version]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
