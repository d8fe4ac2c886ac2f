//! Sequential per-key batch execution with failure isolation.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::api::ApiError;

use super::outcome::{BatchResults, QueryOutcome};

/// Courtesy pacing between batch units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Pause between consecutive keys.
    pub between_keys: Duration,
    /// Extra pause when the reported quota drops below `low_quota_threshold`.
    pub low_quota_pause: Duration,
    /// Remaining-request count under which `low_quota_pause` applies.
    pub low_quota_threshold: u64,
}

impl Pacing {
    /// No pauses at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            between_keys: Duration::ZERO,
            low_quota_pause: Duration::ZERO,
            low_quota_threshold: 0,
        }
    }

    /// Fixed pause between keys, no quota-based pause.
    #[must_use]
    pub const fn fixed(between_keys: Duration) -> Self {
        Self {
            between_keys,
            low_quota_pause: Duration::ZERO,
            low_quota_threshold: 0,
        }
    }

    /// Adds a pause applied when the remaining quota is below `threshold`.
    #[must_use]
    pub const fn with_low_quota_pause(mut self, threshold: u64, pause: Duration) -> Self {
        self.low_quota_threshold = threshold;
        self.low_quota_pause = pause;
        self
    }

    /// Pause to apply after a unit, given the remaining quota.
    #[must_use]
    pub fn pause_for(&self, remaining: Option<u64>) -> Duration {
        let low = remaining.is_some_and(|r| r < self.low_quota_threshold);
        if low {
            self.between_keys.max(self.low_quota_pause)
        } else {
            self.between_keys
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::none()
    }
}

/// Runs `query` once per distinct key, in input order, one at a time.
///
/// `query` returns `Ok(None)` when the upstream had nothing for the key.
/// Errors are logged and recorded as [`QueryOutcome::Failed`]; they never
/// abort the batch. `pause` is consulted after every key except the last
/// and its result is slept before the next key starts.
pub async fn collect_per_key<'k, T, F, Fut, P>(
    label: &str,
    keys: &'k [String],
    mut pause: P,
    mut query: F,
) -> BatchResults<T>
where
    F: FnMut(&'k str) -> Fut,
    Fut: Future<Output = Result<Option<T>, ApiError>>,
    P: FnMut() -> Duration,
{
    let mut distinct: Vec<&'k str> = Vec::with_capacity(keys.len());
    for key in keys {
        if !distinct.contains(&key.as_str()) {
            distinct.push(key.as_str());
        }
    }

    let mut results = BatchResults::new();
    let total = distinct.len();

    for (index, key) in distinct.into_iter().enumerate() {
        let outcome = match query(key).await {
            Ok(Some(value)) => {
                info!(batch = label, key, "collected");
                QueryOutcome::Found(value)
            }
            Ok(None) => {
                info!(batch = label, key, "no data");
                QueryOutcome::NoData
            }
            Err(e) => {
                error!(batch = label, key, error = %e, "query failed");
                QueryOutcome::failed(&e)
            }
        };
        let _ = results.insert(key, outcome);

        if index + 1 < total {
            let delay = pause();
            if !delay.is_zero() {
                debug!(batch = label, delay_ms = delay.as_millis(), "pausing before next key");
                tokio::time::sleep(delay).await;
            }
        }
    }

    results
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_one_entry_per_distinct_key_in_order() {
        let input = keys(&["rust", "go", "rust", "zig"]);
        let calls = RefCell::new(Vec::new());

        let results = collect_per_key("test", &input, || Duration::ZERO, |key| {
            calls.borrow_mut().push(key.to_string());
            async move { Ok(Some(key.len())) }
        })
        .await;

        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["rust", "go", "zig"]);
        assert_eq!(*calls.borrow(), vec!["rust", "go", "zig"]);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let input = keys(&["ok", "bad", "empty"]);

        let results = collect_per_key("test", &input, || Duration::ZERO, |key| async move {
            match key {
                "bad" => Err(ApiError::http_status("https://example.com", 500)),
                "empty" => Ok(None),
                _ => Ok(Some(1_u32)),
            }
        })
        .await;

        assert_eq!(results.get("ok"), Some(&QueryOutcome::Found(1)));
        assert!(results.get("bad").unwrap().is_failed());
        assert_eq!(results.get("empty"), Some(&QueryOutcome::NoData));
    }

    #[tokio::test]
    async fn test_pause_only_between_keys() {
        let input = keys(&["a", "b", "c"]);
        let pauses = RefCell::new(0);

        let _ = collect_per_key(
            "test",
            &input,
            || {
                *pauses.borrow_mut() += 1;
                Duration::ZERO
            },
            |_| async { Ok(Some(())) },
        )
        .await;

        assert_eq!(*pauses.borrow(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_duration_is_slept() {
        let input = keys(&["a", "b"]);
        let start = tokio::time::Instant::now();

        let _ = collect_per_key("test", &input, || Duration::from_secs(5), |_| async {
            Ok(Some(()))
        })
        .await;

        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn test_pacing_low_quota() {
        let pacing = Pacing::fixed(Duration::from_millis(500))
            .with_low_quota_pause(10, Duration::from_secs(5));
        assert_eq!(pacing.pause_for(Some(100)), Duration::from_millis(500));
        assert_eq!(pacing.pause_for(Some(9)), Duration::from_secs(5));
        assert_eq!(pacing.pause_for(None), Duration::from_millis(500));
        assert_eq!(Pacing::none().pause_for(Some(0)), Duration::ZERO);
    }
}
