//! Error types for the API layer.
//!
//! Every failure carries the URL (with credentials stripped) or a short
//! context string so that a failed batch item can be traced back to the
//! request that produced it.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while talking to an upstream API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request did not complete within the configured timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-throttling HTTP error response.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The upstream kept throttling until the attempt budget ran out.
    #[error("still throttled after {attempts} attempts requesting {url}")]
    RetriesExhausted {
        /// The URL that was throttled.
        url: String,
        /// Number of requests issued, including the first.
        attempts: u32,
    },

    /// The response body or one of its fields did not have the expected shape.
    #[error("malformed response ({context}): {message}")]
    MalformedResponse {
        /// Where the bad data came from (URL or field name).
        context: String,
        /// What was wrong with it.
        message: String,
    },

    /// The request could not be built (bad base URL, empty keyword list, ...).
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },
}

impl ApiError {
    /// Creates a network error, mapping reqwest timeouts to [`ApiError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an exhausted-retries error.
    pub fn retries_exhausted(url: impl Into<String>, attempts: u32) -> Self {
        Self::RetriesExhausted {
            url: url.into(),
            attempts,
        }
    }

    /// Creates a malformed-response error.
    pub fn malformed(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid-request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Returns the serializable failure classification for this error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } => FailureKind::Network,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::HttpStatus { .. } => FailureKind::HttpStatus,
            Self::RetriesExhausted { .. } => FailureKind::Throttled,
            Self::MalformedResponse { .. } => FailureKind::MalformedResponse,
            Self::InvalidRequest { .. } => FailureKind::InvalidRequest,
        }
    }
}

/// Classification of a failed request, suitable for result records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Throttled on every attempt.
    Throttled,
    /// Transport failure.
    Network,
    /// Per-request timeout elapsed.
    Timeout,
    /// Upstream answered with a non-throttling error status.
    HttpStatus,
    /// Response or field could not be interpreted.
    MalformedResponse,
    /// Request could not be built.
    InvalidRequest,
}

/// A failure captured in a result record in place of data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable description (the error's display text).
    pub message: String,
}

impl From<&ApiError> for FailureReport {
    fn from(error: &ApiError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

// Note: there is no `From<reqwest::Error>` for `ApiError`. Every variant needs
// the request URL, which the source error does not reliably carry.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display_contains_status_and_url() {
        let error = ApiError::http_status("https://api.github.com/search/repositories", 422);
        let msg = error.to_string();
        assert!(msg.contains("422"), "Expected '422' in: {msg}");
        assert!(msg.contains("/search/repositories"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_retries_exhausted_maps_to_throttled_kind() {
        let error = ApiError::retries_exhausted("https://example.com/tags", 4);
        assert_eq!(error.kind(), FailureKind::Throttled);
        assert!(error.to_string().contains("4 attempts"));
    }

    #[test]
    fn test_malformed_display_includes_context() {
        let error = ApiError::malformed("created_at", "input contains invalid characters");
        assert_eq!(error.kind(), FailureKind::MalformedResponse);
        assert!(error.to_string().contains("created_at"));
    }

    #[test]
    fn test_failure_report_from_error() {
        let error = ApiError::timeout("https://example.com/questions");
        let report = FailureReport::from(&error);
        assert_eq!(report.kind, FailureKind::Timeout);
        assert_eq!(report.message, error.to_string());
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::MalformedResponse).unwrap();
        assert_eq!(json, "\"malformed_response\"");
    }
}
