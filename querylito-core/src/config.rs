use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RetryPolicy;

/// Per-family configuration of a cached request.
///
/// * `stale_time` - how long a successful result stays fresh
/// * `gc_time` - how long an entry survives once its last subscriber is gone
/// * `retry` - retry ceiling and backoff for failed fetches
/// * `refetch_interval` - periodic refresh while subscribed (`None` = off)
/// * `refetch_interval_in_background` - keep the periodic refresh running while unfocused
/// * `refetch_on_focus` - refresh stale entries when the surface regains focus
/// * `enabled` - when `false`, the fetcher is never called
///
/// The defaults are the session-wide defaults; request families override
/// what they need with the `with_*` builders.
///
/// # Examples
///
/// ```
/// use querylito_core::QueryConfig;
/// use std::time::Duration;
///
/// let config = QueryConfig::default()
///     .with_stale_time(Duration::from_secs(300))
///     .with_refetch_interval(Duration::from_secs(300));
///
/// assert_eq!(config.gc_time, Duration::from_secs(30 * 60));
/// assert!(config.refetch_on_focus);
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    #[serde(with = "humantime_serde")]
    pub stale_time: Duration,

    #[serde(with = "humantime_serde")]
    pub gc_time: Duration,

    pub retry: RetryPolicy,

    #[serde(with = "humantime_serde")]
    pub refetch_interval: Option<Duration>,

    pub refetch_interval_in_background: bool,

    pub refetch_on_focus: bool,

    pub enabled: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(30 * 60),
            retry: RetryPolicy::default(),
            refetch_interval: None,
            refetch_interval_in_background: false,
            refetch_on_focus: true,
            enabled: true,
        }
    }
}

impl QueryConfig {
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    pub fn with_refetch_interval_in_background(mut self, background: bool) -> Self {
        self.refetch_interval_in_background = background;
        self
    }

    pub fn with_refetch_on_focus(mut self, refetch_on_focus: bool) -> Self {
        self.refetch_on_focus = refetch_on_focus;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Interval refresh, if configured and non-zero.
    pub fn interval(&self) -> Option<Duration> {
        self.refetch_interval.filter(|interval| !interval.is_zero())
    }
}
