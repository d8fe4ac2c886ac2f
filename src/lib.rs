//! Demand Signals Library
//!
//! Collects technology-demand signals from three public sources and turns
//! them into per-technology metrics:
//!
//! - Stack Overflow question activity ([`collectors::QaCollector`])
//! - GitHub repository popularity ([`collectors::RepoCollector`])
//! - Google Trends search interest ([`collectors::SearchInterestCollector`])
//!
//! # Architecture
//!
//! - [`api`] - rate-limited request executor with bounded throttle retries
//! - [`metrics`] - per-key outcomes, batch collection, statistics helpers
//! - [`collectors`] - the three source-specific collectors
//! - [`config`] - TOML config file and environment layering
//!
//! Batch operations never fail as a whole: every input key gets a
//! [`QueryOutcome`] of its own.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod collectors;
pub mod config;
pub mod metrics;
mod user_agent;

// Re-export commonly used types
pub use api::{ApiError, FailureKind, FailureReport, RequestExecutor, ThrottlePolicy};
pub use collectors::{
    CollectorOptions, QaCollector, RepoCollector, SearchInterestCollector, TrendsApi, TrendsSession,
};
pub use config::{ConfigError, FileConfig, Settings};
pub use metrics::{BatchResults, KeyedResults, MetricsReport, Pacing, QueryOutcome};
