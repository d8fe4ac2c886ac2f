//! Shared HTTP client construction policy for collectors.
//!
//! Centralizes timeouts, user-agent, compression and default headers so every
//! collector talks to its upstream the same way.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder};

use crate::user_agent;

use super::ApiError;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connect and per-request timeouts for an API client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// TCP/TLS connect timeout.
    pub connect: Duration,
    /// Whole-request timeout (30 seconds by default).
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

impl HttpTimeouts {
    /// Creates timeouts from whole seconds.
    #[must_use]
    pub fn from_secs(connect_secs: u64, request_secs: u64) -> Self {
        Self {
            connect: Duration::from_secs(connect_secs),
            request: Duration::from_secs(request_secs),
        }
    }
}

/// Builds an API client using shared project policy.
///
/// `api_name` is used only for error messages.
///
/// # Errors
///
/// Returns [`ApiError::InvalidRequest`] when client construction fails.
pub fn build_api_client(
    api_name: &str,
    default_headers: HeaderMap,
    timeouts: HttpTimeouts,
    cookie_store: bool,
) -> Result<Client, ApiError> {
    base_builder(default_headers, timeouts)
        .cookie_store(cookie_store)
        .build()
        .map_err(|error| {
            ApiError::invalid_request(format!(
                "{api_name} HTTP client construction failed: {error}"
            ))
        })
}

fn base_builder(default_headers: HeaderMap, timeouts: HttpTimeouts) -> ClientBuilder {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.request)
        .user_agent(user_agent::default_api_user_agent())
        .default_headers(default_headers)
        .gzip(true)
}
