//! Timestamp parsing for recency filters.
//!
//! Upstream timestamps are accepted in exactly one format,
//! `YYYY-MM-DDTHH:MM:SSZ`. Anything else is a malformed response.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::api::ApiError;

/// The only timestamp layout accepted from upstream payloads.
pub const API_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parses an upstream timestamp.
///
/// # Errors
///
/// Returns [`ApiError::MalformedResponse`] naming `field` when the value is
/// not in [`API_TIMESTAMP_FORMAT`].
pub fn parse_api_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, ApiError> {
    NaiveDateTime::parse_from_str(value, API_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| ApiError::malformed(field, format!("{value:?}: {e}")))
}

/// Counts timestamps strictly newer than `cutoff`.
///
/// A missing or malformed timestamp fails the whole count.
///
/// # Errors
///
/// Returns [`ApiError::MalformedResponse`] for the first missing or malformed
/// value.
pub fn count_newer_than<'a, I>(field: &str, values: I, cutoff: DateTime<Utc>) -> Result<u64, ApiError>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut count = 0;
    for value in values {
        let value = value.ok_or_else(|| ApiError::malformed(field, "missing timestamp"))?;
        if parse_api_timestamp(field, value)? > cutoff {
            count += 1;
        }
    }
    Ok(count)
}

/// Formats a date as `YYYY-MM-DD` for search qualifiers.
#[must_use]
pub fn format_day(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}
