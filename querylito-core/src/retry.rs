use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::FetchError;

/// Decides whether and when a failed fetch is tried again.
///
/// Delays grow exponentially from `base_delay` and are capped at `max_delay`:
///
/// ```text
/// delay(attempt) = min(base_delay * 2^attempt, max_delay)
/// ```
///
/// `attempt` is the 0-based index of the try that just failed, so with
/// `max_retries = 2` a request is tried at most three times.
///
/// Cancellation is never retried.
///
/// # Examples
///
/// ```
/// use querylito_core::{FetchError, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(2, Duration::from_millis(1500), Duration::from_millis(8000));
///
/// let delays: Vec<u128> = (0..5).map(|a| policy.delay_for(a).as_millis()).collect();
/// assert_eq!(delays, vec![1500, 3000, 6000, 8000, 8000]);
///
/// let err = FetchError::network("https://example.test", "reset");
/// assert!(policy.should_retry(0, &err));
/// assert!(policy.should_retry(1, &err));
/// assert!(!policy.should_retry(2, &err));
/// assert!(!policy.should_retry(0, &FetchError::Cancelled));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed try.
    pub max_retries: u32,

    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Spread applied to each delay, as a fraction of it (0.0 to 1.0).
    pub jitter: f64,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    /// A policy that gives up after the first failure.
    pub const fn never() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Returns a copy of this policy with the given jitter factor, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        self
    }

    /// Whether the try with index `attempt` that failed with `error` should be retried.
    pub fn should_retry(&self, attempt: u32, error: &FetchError) -> bool {
        !error.is_cancelled() && attempt < self.max_retries
    }

    /// Backoff before the retry that follows the failed try `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay);

        if self.jitter <= 0.0 {
            return delay;
        }

        let secs = delay.as_secs_f64();
        let offset = (fastrand::f64() * 2.0 - 1.0) * secs * self.jitter;
        Duration::try_from_secs_f64((secs + offset).max(0.0))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(2000), Duration::from_secs(10))
    }
}
