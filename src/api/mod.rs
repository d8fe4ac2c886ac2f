//! HTTP plumbing shared by the collectors.
//!
//! This module provides:
//! - [`RequestExecutor`] - GET requests with credential attachment, throttle
//!   detection, and bounded wait-and-retry
//! - [`ThrottlePolicy`] - how long to wait and when to give up
//! - [`RateLimitState`] - quota reported by the most recent response
//! - [`ApiError`] / [`FailureKind`] - failure taxonomy

mod error;
mod executor;
mod http_client;
mod rate_limit;
mod retry;

pub use error::{ApiError, FailureKind, FailureReport};
pub use executor::{Credential, RequestExecutor, RequestExecutorBuilder};
pub use http_client::HttpTimeouts;
pub use rate_limit::{
    REMAINING_HEADER, RESET_HEADER, RateLimitState, parse_retry_after, retry_after_from_headers,
};
pub use retry::{DEFAULT_MAX_ATTEMPTS, ThrottleDecision, ThrottlePolicy, WaitHint};
