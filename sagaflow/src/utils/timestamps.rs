//! Timestamp helpers shared by events and control-plane payloads.

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Errors that can occur during timestamp parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    /// The timestamp string is empty.
    #[error("Empty timestamp string")]
    EmptyString,

    /// The timestamp value is invalid.
    #[error("Invalid timestamp: {0}")]
    InvalidFormat(String),
}

/// Returns the current UTC time as an RFC 3339 string with microseconds.
///
/// # Examples
///
/// ```
/// use sagaflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_timestamp(&Utc::now())
}

/// Formats a timestamp the way event payloads carry it.
#[must_use]
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Parses an RFC 3339 / RFC 2822 string or a Unix timestamp.
///
/// Numeric input with more than 10 integer digits is read as milliseconds.
///
/// # Errors
///
/// Returns `TimestampError` if the input cannot be parsed.
pub fn parse_timestamp(input: &str) -> Result<Timestamp, TimestampError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(TimestampError::EmptyString);
    }

    if let Ok(num) = trimmed.parse::<i64>() {
        return parse_unix(num);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    Err(TimestampError::InvalidFormat(trimmed.to_string()))
}

/// Parses a Unix timestamp in seconds or milliseconds.
///
/// # Errors
///
/// Returns `TimestampError::InvalidFormat` if the value is out of range.
pub fn parse_unix(value: i64) -> Result<Timestamp, TimestampError> {
    let parsed = if value.unsigned_abs() > 9_999_999_999 {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    };
    parsed.ok_or_else(|| TimestampError::InvalidFormat(value.to_string()))
}
