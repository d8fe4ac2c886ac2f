//! Rate-limit bookkeeping for an API session.
//!
//! Upstream APIs report their quota through response headers:
//!
//! - `X-RateLimit-Remaining`: requests left in the current window
//! - `X-RateLimit-Reset`: Unix timestamp when the window resets
//! - `Retry-After`: explicit wait, in seconds or as an HTTP-date
//!
//! [`RateLimitState`] captures the first two from the most recent response
//! only; it is replaced wholesale on every response so stale values never
//! survive a response that omits them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use tracing::{debug, instrument, warn};

/// Header carrying the remaining request count.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Header carrying the quota reset time as a Unix timestamp.
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Quota information reported by the most recent response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    /// Requests left in the current window, when reported.
    pub remaining: Option<u64>,
    /// When the current window resets, when reported.
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// Reads the quota headers of a response.
    ///
    /// Missing or unparseable headers leave the corresponding field `None`.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let remaining = header_str(headers, REMAINING_HEADER).and_then(|v| v.parse::<u64>().ok());
        let reset_at = header_str(headers, RESET_HEADER)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Self {
            remaining,
            reset_at,
        }
    }

    /// Returns true when the upstream reported zero requests left.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Returns true when the reported remaining count is below `threshold`.
    ///
    /// An unreported count is never considered low.
    #[must_use]
    pub fn is_below(&self, threshold: u64) -> bool {
        self.remaining.is_some_and(|remaining| remaining < threshold)
    }

    /// Time left until the window resets, relative to `now`.
    ///
    /// Returns `None` when no reset time is known and [`Duration::ZERO`] when
    /// the reset time has already passed.
    #[must_use]
    pub fn until_reset(&self, now: DateTime<Utc>) -> Option<Duration> {
        let reset_at = self.reset_at?;
        Some((reset_at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
}

/// Reads and parses the `Retry-After` header of a response, if present.
#[must_use]
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, reqwest::header::RETRY_AFTER.as_str()).and_then(parse_retry_after)
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use demand_signals::api::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(cap_retry_after(duration));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        // A date in the past means "retry now".
        let duration = datetime
            .duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO);
        Some(cap_retry_after(duration))
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

fn cap_retry_after(duration: Duration) -> Duration {
    if duration > MAX_RETRY_AFTER {
        warn!(
            delay_secs = duration.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        MAX_RETRY_AFTER
    } else {
        duration
    }
}
