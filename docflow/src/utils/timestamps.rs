//! Timestamp formatting and parsing for stored keys.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use thiserror::Error;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Errors that can occur during timestamp parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    /// The timestamp string is empty.
    #[error("Empty timestamp string")]
    EmptyString,

    /// The timestamp value is invalid.
    #[error("Invalid timestamp: {0}")]
    InvalidFormat(String),
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a timestamp the way it is stored inside composite keys.
///
/// Whole seconds render without a fraction (`2021-01-01T00:00:00Z`) so keys
/// written by ingestion sort lexically in time order.
#[must_use]
pub fn format_stamp(stamp: &Timestamp) -> String {
    stamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses a stored stamp.
///
/// Accepts RFC 3339 with any offset, plus naive ISO 8601 date-times which are
/// taken as UTC (provider events often omit the offset).
pub fn parse_stamp(input: &str) -> Result<Timestamp, TimestampError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(TimestampError::EmptyString);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    let formats = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];
    for fmt in formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(TimestampError::InvalidFormat(trimmed.to_string()))
}
