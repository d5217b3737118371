use std::time::Instant;

use crate::{FetchError, FetchStatus, QueryConfig, Snapshot};

/// Identifies one physical fetch of an entry.
///
/// Every completion is tagged with the id of the fetch that produced it. A
/// completion whose id is not the entry's current in-flight id belongs to a
/// superseded fetch and is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FetchId(u64);

impl FetchId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

/// State of one cached request.
///
/// `CacheEntry` tracks the last good value, the last terminal failure, when
/// the value was fetched, the at-most-one fetch in flight, consecutive
/// failures and the number of subscribers. It never reads a clock: every
/// time-dependent method takes `now` explicitly.
///
/// Data is never dropped by a failure. A failed refresh sets `error` next to
/// the old `data`, and only the next success clears the error.
///
/// # Examples
///
/// ```
/// use querylito_core::{CacheEntry, FetchId, QueryConfig};
/// use std::time::{Duration, Instant};
///
/// let config = QueryConfig::default().with_stale_time(Duration::from_secs(300));
/// let mut entry: CacheEntry<i32> = CacheEntry::new(config);
/// let t0 = Instant::now();
///
/// assert!(entry.needs_fetch(t0));
/// let id = FetchId::new(1);
/// assert!(entry.begin_fetch(id));
/// assert!(entry.record_success(id, 18, t0));
///
/// assert!(!entry.is_stale(t0 + Duration::from_secs(299)));
/// assert!(entry.is_stale(t0 + Duration::from_secs(301)));
/// ```
#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
    data: Option<T>,
    error: Option<FetchError>,
    fetched_at: Option<Instant>,
    invalidated: bool,
    /// Set when an invalidation lands while a fetch is in flight; that
    /// fetch's result does not clear it.
    invalidated_in_flight: bool,
    config: QueryConfig,
    in_flight: Option<FetchId>,
    status: FetchStatus,
    retry_count: u32,
    subscriber_count: usize,
}

impl<T> CacheEntry<T> {
    /// Creates an empty entry for the given config.
    pub fn new(config: QueryConfig) -> Self {
        let status = if config.enabled {
            FetchStatus::Idle
        } else {
            FetchStatus::Disabled
        };
        Self {
            data: None,
            error: None,
            fetched_at: None,
            invalidated: false,
            invalidated_in_flight: false,
            config,
            in_flight: None,
            status,
            retry_count: 0,
            subscriber_count: 0,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Replaces the config. Returns `true` if it changed.
    pub fn set_config(&mut self, config: QueryConfig) -> bool {
        if self.config == config {
            return false;
        }
        self.config = config;
        if self.in_flight.is_none() {
            self.status = self.resting_status();
        }
        true
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    pub fn status(&self) -> FetchStatus {
        self.status
    }

    pub fn in_flight(&self) -> Option<FetchId> {
        self.in_flight
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// `true` once `stale_time` has elapsed since the last success, when
    /// nothing was ever fetched, or after an explicit invalidation.
    pub fn is_stale(&self, now: Instant) -> bool {
        if self.invalidated {
            return true;
        }
        match self.fetched_at {
            Some(fetched_at) => now.saturating_duration_since(fetched_at) >= self.config.stale_time,
            None => true,
        }
    }

    /// Whether a new fetch should start now.
    ///
    /// Disabled entries and entries with a fetch in flight never need one.
    /// Otherwise an entry needs a fetch when it has no data, carries an
    /// error, or is stale.
    pub fn needs_fetch(&self, now: Instant) -> bool {
        self.config.enabled
            && self.in_flight.is_none()
            && (self.data.is_none() || self.error.is_some() || self.is_stale(now))
    }

    /// Marks fetch `id` as in flight. Returns `false` if another fetch
    /// already occupies the entry.
    pub fn begin_fetch(&mut self, id: FetchId) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.in_flight = Some(id);
        self.invalidated_in_flight = false;
        self.status = FetchStatus::Fetching;
        true
    }

    /// A scheduled retry of fetch `id` has started its next try.
    pub fn record_retry_started(&mut self, id: FetchId) -> bool {
        if self.in_flight != Some(id) {
            return false;
        }
        self.status = FetchStatus::Fetching;
        true
    }

    /// Stores the result of fetch `id`.
    pub fn record_success(&mut self, id: FetchId, value: T, now: Instant) -> bool {
        if self.in_flight != Some(id) {
            return false;
        }
        self.data = Some(value);
        self.error = None;
        self.fetched_at = Some(now);
        self.invalidated = self.invalidated_in_flight;
        self.invalidated_in_flight = false;
        self.retry_count = 0;
        self.in_flight = None;
        self.status = FetchStatus::Success;
        true
    }

    /// Fetch `id` failed and will be retried after `delay`.
    ///
    /// The entry stays occupied so no concurrent fetch can start, and the
    /// previous `error` is left untouched until retries are exhausted.
    pub fn record_retry_scheduled(
        &mut self,
        id: FetchId,
        attempt: u32,
        delay: std::time::Duration,
    ) -> bool {
        if self.in_flight != Some(id) {
            return false;
        }
        self.retry_count = self.retry_count.saturating_add(1);
        self.status = FetchStatus::Retrying { attempt, delay };
        true
    }

    /// Fetch `id` failed for good.
    pub fn record_exhausted(&mut self, id: FetchId, error: FetchError) -> bool {
        if self.in_flight != Some(id) {
            return false;
        }
        self.retry_count = self.retry_count.saturating_add(1);
        self.error = Some(error);
        self.in_flight = None;
        self.status = FetchStatus::Failed;
        true
    }

    /// Fetch `id` was cancelled.
    ///
    /// Releases the entry without touching `data`, `error` or `retry_count`.
    pub fn record_cancelled(&mut self, id: FetchId) -> bool {
        if self.in_flight != Some(id) {
            return false;
        }
        self.in_flight = None;
        self.status = self.resting_status();
        true
    }

    /// Stores `value` as if it had just been fetched, without a fetch.
    pub fn set_data(&mut self, value: T, now: Instant) {
        self.data = Some(value);
        self.error = None;
        self.fetched_at = Some(now);
        self.invalidated = false;
        self.retry_count = 0;
        if self.in_flight.is_none() {
            self.status = FetchStatus::Success;
        }
    }

    /// Forces the next freshness check to fail, keeping the current data readable.
    ///
    /// A fetch already in flight was requested before the invalidation, so
    /// its result is stored but still counts as stale.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
        if self.in_flight.is_some() {
            self.invalidated_in_flight = true;
        }
    }

    /// Registers a subscriber and returns the new count.
    pub fn add_subscriber(&mut self) -> usize {
        self.subscriber_count += 1;
        self.subscriber_count
    }

    /// Removes a subscriber and returns the remaining count.
    pub fn remove_subscriber(&mut self) -> usize {
        self.subscriber_count = self.subscriber_count.saturating_sub(1);
        self.subscriber_count
    }

    fn resting_status(&self) -> FetchStatus {
        if self.error.is_some() {
            FetchStatus::Failed
        } else if self.data.is_some() {
            FetchStatus::Success
        } else if self.config.enabled {
            FetchStatus::Idle
        } else {
            FetchStatus::Disabled
        }
    }
}

impl<T: Clone> CacheEntry<T> {
    /// Immutable view of this entry at `now`.
    pub fn snapshot(&self, now: Instant) -> Snapshot<T> {
        let is_fetching = self.in_flight.is_some();
        Snapshot {
            data: self.data.clone(),
            error: self.error.clone(),
            status: self.status,
            is_loading: is_fetching && self.data.is_none(),
            is_fetching,
            is_stale: self.is_stale(now),
            fetched_at: self.fetched_at,
            retry_count: self.retry_count,
        }
    }
}
