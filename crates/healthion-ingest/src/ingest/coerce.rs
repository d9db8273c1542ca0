//! Value coercion for loosely-typed cells
//!
//! Never fails: anything that cannot be represented becomes `None`.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::types::BigDecimal;
use std::str::FromStr;

use super::models::Scalar;

/// Timestamp layout used by health exports, e.g. `2024-01-01 10:00:00 +0100`
const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";
const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Coerce a cell to a decimal.
///
/// A float zero (either sign) maps to `0` directly; everything else goes
/// through a strict decimal parse of its text form.
pub fn coerce_decimal(value: Option<&Scalar>) -> Option<BigDecimal> {
    match value? {
        Scalar::Float(f) if *f == 0.0 => Some(BigDecimal::from(0)),
        Scalar::Float(f) if !f.is_finite() => None,
        other => {
            let text = other.to_string();
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            BigDecimal::from_str(trimmed).ok()
        },
    }
}

/// Coerce a cell to a UTC timestamp
pub fn coerce_timestamp(value: Option<&Scalar>) -> Option<DateTime<Utc>> {
    let text = match value? {
        Scalar::Text(s) => s.trim().to_string(),
        _ => return None,
    };

    if let Ok(ts) = DateTime::parse_from_str(&text, EXPORT_TIMESTAMP_FORMAT) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(&text) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&text, NAIVE_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Text form of a cell, or empty when absent
pub fn coerce_text(value: Option<&Scalar>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Truncate to at most `max_chars` characters
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
