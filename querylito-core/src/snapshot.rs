use std::time::{Duration, Instant};

use crate::FetchError;

/// Where an entry stands in its fetch lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStatus {
    /// Nothing has been fetched and nothing is running.
    Idle,
    /// The entry's config disables fetching. Not an error, not loading.
    Disabled,
    /// A fetch is running.
    Fetching,
    /// A try failed and the next one is scheduled after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// The last fetch succeeded.
    Success,
    /// The last fetch failed after all retries.
    Failed,
}

impl FetchStatus {
    /// `true` while a fetch (or its pending retry) occupies the entry.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, FetchStatus::Fetching | FetchStatus::Retrying { .. })
    }
}

/// Immutable view of a cache entry.
///
/// This is what `get` returns and what subscribers receive. It never points
/// back into the cache: mutating the entry afterwards does not change a
/// snapshot already handed out.
///
/// `data` and `error` can both be set: a refresh that failed keeps the last
/// good value visible next to the failure.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<T> {
    pub data: Option<T>,
    pub error: Option<FetchError>,
    pub status: FetchStatus,
    /// A fetch is in flight and there is no data to show yet.
    pub is_loading: bool,
    /// A fetch is in flight, with or without data.
    pub is_fetching: bool,
    pub is_stale: bool,
    pub fetched_at: Option<Instant>,
    /// Consecutive failures since the last success.
    pub retry_count: u32,
}

impl<T> Snapshot<T> {
    /// Snapshot of an entry that does not exist yet.
    pub fn empty() -> Self {
        Self {
            data: None,
            error: None,
            status: FetchStatus::Idle,
            is_loading: false,
            is_fetching: false,
            is_stale: true,
            fetched_at: None,
            retry_count: 0,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.status == FetchStatus::Disabled
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.error.is_none()
    }

    /// Maps the data, keeping every other field.
    pub fn map<U, F>(self, f: F) -> Snapshot<U>
    where
        F: FnOnce(T) -> U,
    {
        Snapshot {
            data: self.data.map(f),
            error: self.error,
            status: self.status,
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
            fetched_at: self.fetched_at,
            retry_count: self.retry_count,
        }
    }
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self::empty()
    }
}
