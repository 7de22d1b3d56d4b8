//! Wire-stable timestamp handling.
//!
//! Every timestamp that crosses a process boundary is truncated to
//! millisecond precision and rendered as `YYYY-MM-DDTHH:MM:SS.mmmZ`.

use crate::{ModelError, ModelResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};

/// Drop everything below millisecond precision.
pub fn truncate_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = dt.nanosecond();
    dt.with_nanosecond(nanos - nanos % 1_000_000).unwrap_or(dt)
}

/// Render a timestamp in the canonical wire format.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    truncate_millis(dt)
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Parse a timestamp with or without a UTC marker.
///
/// Accepts RFC 3339 text (`Z` or a numeric offset, converted to UTC) and
/// naive ISO-8601 text, which is taken to already be UTC. The result is
/// truncated to milliseconds.
pub fn parse_timestamp(text: &str) -> ModelResult<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ModelError::InvalidTimestamp(text.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(truncate_millis(dt.with_timezone(&Utc)));
    }

    let naive = trimmed.replacen(' ', "T", 1);
    naive
        .parse::<NaiveDateTime>()
        .map(|n| truncate_millis(Utc.from_utc_datetime(&n)))
        .map_err(|_| ModelError::InvalidTimestamp(text.to_string()))
}
