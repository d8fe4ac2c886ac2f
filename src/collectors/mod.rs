//! Collectors for the three upstream signal sources.
//!
//! Each collector owns one [`RequestExecutor`](crate::api::RequestExecutor)
//! (or a [`TrendsApi`] session) and a `tracing` span; collectors never call
//! each other.
//!
//! - [`QaCollector`] - Stack Exchange Q&A activity
//! - [`RepoCollector`] - GitHub repository popularity
//! - [`SearchInterestCollector`] - Google Trends search interest

pub mod github;
pub mod stackoverflow;
pub mod trends;

pub use github::{RepoCollector, TrendingWindow};
pub use stackoverflow::QaCollector;
pub use trends::{SearchInterestCollector, TrendsApi, TrendsSession};

use crate::api::{HttpTimeouts, ThrottlePolicy};
use crate::metrics::Pacing;

/// Construction options shared by all collectors.
///
/// Every field has a sensible default; tests override `base_url`, `policy`
/// and `pacing` to point at a mock server and avoid real waits.
#[derive(Debug, Clone, Default)]
pub struct CollectorOptions {
    /// Replaces the public API root.
    pub base_url: Option<String>,
    /// API token or key.
    pub credential: Option<String>,
    /// Client timeouts.
    pub timeouts: HttpTimeouts,
    /// Throttle handling.
    pub policy: ThrottlePolicy,
    /// Courtesy pacing; `None` uses the collector's own default.
    pub pacing: Option<Pacing>,
}
