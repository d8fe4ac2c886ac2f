//! Bounded wait-and-retry policy for throttled requests.
//!
//! When an upstream signals that the quota is exceeded, the executor asks the
//! [`ThrottlePolicy`] what to do. The policy picks the wait from, in order:
//!
//! 1. the server's `Retry-After` header,
//! 2. the known quota reset time, never less than `min_reset_wait`,
//! 3. an exponential fallback starting at `fallback_wait`.
//!
//! Every wait is capped at `max_wait`, and after `max_attempts` requests the
//! policy gives up so a persistently throttled upstream cannot stall a batch.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use demand_signals::api::{ThrottleDecision, ThrottlePolicy, WaitHint};
//!
//! let policy = ThrottlePolicy::default().with_jitter(Duration::ZERO);
//! let hint = WaitHint {
//!     retry_after: Some(Duration::from_secs(5)),
//!     until_reset: None,
//! };
//!
//! match policy.decide(1, hint) {
//!     ThrottleDecision::Wait { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(5));
//!         assert_eq!(attempt, 2);
//!     }
//!     ThrottleDecision::GiveUp { .. } => unreachable!(),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default maximum request attempts per call, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Wait used when the server gives no hint (60 seconds).
const DEFAULT_FALLBACK_WAIT: Duration = Duration::from_secs(60);

/// Lower bound applied to a wait derived from the quota reset time.
const DEFAULT_MIN_RESET_WAIT: Duration = Duration::from_secs(60);

/// Upper bound for any single wait (1 hour, one full quota window).
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(3600);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Default maximum jitter added to fallback waits.
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// Server-provided information about how long to wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitHint {
    /// Parsed `Retry-After` header.
    pub retry_after: Option<Duration>,
    /// Time left until the quota window resets.
    pub until_reset: Option<Duration>,
}

/// Decision after a throttling response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Wait, then issue the same request again.
    Wait {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt the retry will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Stop retrying.
    GiveUp {
        /// Requests issued so far.
        attempts: u32,
    },
}

/// Configuration for throttle handling.
///
/// # Default Values
///
/// - `max_attempts`: 4
/// - `fallback_wait`: 60 seconds
/// - `min_reset_wait`: 60 seconds
/// - `max_wait`: 1 hour
/// - `backoff_multiplier`: 2.0
/// - `max_jitter`: 500 ms (fallback waits only)
#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    max_attempts: u32,
    fallback_wait: Duration,
    min_reset_wait: Duration,
    max_wait: Duration,
    backoff_multiplier: f32,
    max_jitter: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            fallback_wait: DEFAULT_FALLBACK_WAIT,
            min_reset_wait: DEFAULT_MIN_RESET_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl ThrottlePolicy {
    /// Creates a policy with custom settings and no jitter.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        fallback_wait: Duration,
        min_reset_wait: Duration,
        max_wait: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            fallback_wait,
            min_reset_wait,
            max_wait,
            backoff_multiplier,
            max_jitter: Duration::ZERO,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Replaces the fallback wait used when the server gives no hint.
    #[must_use]
    pub fn with_fallback_wait(mut self, fallback_wait: Duration) -> Self {
        self.fallback_wait = fallback_wait;
        self
    }

    /// Replaces the maximum jitter added to fallback waits.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the fallback wait.
    #[must_use]
    pub fn fallback_wait(&self) -> Duration {
        self.fallback_wait
    }

    /// Decides what to do after attempt number `attempt` (1-indexed) was throttled.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn decide(&self, attempt: u32, hint: WaitHint) -> ThrottleDecision {
        if attempt >= self.max_attempts {
            debug!(attempt, "max attempts reached");
            return ThrottleDecision::GiveUp { attempts: attempt };
        }

        let delay = self.wait_for(attempt, hint);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry throttled request"
        );

        ThrottleDecision::Wait {
            delay,
            attempt: attempt + 1,
        }
    }

    fn wait_for(&self, attempt: u32, hint: WaitHint) -> Duration {
        if let Some(retry_after) = hint.retry_after {
            return retry_after.min(self.max_wait);
        }
        if let Some(until_reset) = hint.until_reset {
            return until_reset.max(self.min_reset_wait).min(self.max_wait);
        }
        self.backoff_delay(attempt) + self.jitter()
    }

    /// Formula: `min(fallback_wait * multiplier^(attempt - 1), max_wait)`
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.fallback_wait.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_wait.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
