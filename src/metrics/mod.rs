//! Aggregate metrics building blocks.
//!
//! - [`collect_per_key`] - sequential batch with per-key failure isolation
//! - [`QueryOutcome`] / [`KeyedResults`] - tagged, ordered results
//! - [`dates`] - strict timestamp parsing for recency counts
//! - [`stats`] - mean and sample standard deviation

mod batch;
pub mod dates;
mod outcome;
pub mod stats;

pub use batch::{Pacing, collect_per_key};
pub use outcome::{BatchResults, KeyedResults, MetricsReport, QueryOutcome};
