//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod socket_guard;

use std::time::Duration;

use demand_signals::{CollectorOptions, Pacing, ThrottlePolicy};

/// Policy with millisecond waits so throttle tests finish quickly.
pub fn fast_policy(max_attempts: u32) -> ThrottlePolicy {
    ThrottlePolicy::new(
        max_attempts,
        Duration::from_millis(10),
        Duration::from_millis(10),
        Duration::from_millis(50),
        2.0,
    )
}

/// Collector options pointed at `base_url` with no pacing and fast retries.
pub fn mock_options(base_url: impl Into<String>, credential: Option<&str>) -> CollectorOptions {
    CollectorOptions {
        base_url: Some(base_url.into()),
        credential: credential.map(ToString::to_string),
        policy: fast_policy(3),
        pacing: Some(Pacing::none()),
        ..CollectorOptions::default()
    }
}
