//! # Querylito Async
//!
//! The async engine of Querylito: a request cache that fetches on Tokio,
//! collapses concurrent requests, serves stale data while it revalidates,
//! retries with capped exponential backoff and evicts entries nobody uses.
//!
//! ## Features
//!
//! - **Request collapsing**: At most one fetch in flight per fingerprint
//! - **Stale-while-revalidate**: Stale data stays readable during a refresh
//! - **Retries**: Per-family [`RetryPolicy`]; cancellation is never retried
//! - **Subscriptions**: Ordered [`Snapshot`] delivery via [`Subscription`] or a callback
//! - **Interval refresh**: [`RefreshScheduler`] timers that respect focus
//! - **Timed eviction**: Entries are dropped `gc_time` after their last subscriber left
//! - **Cancellation**: Fetchers receive a [`CancellationToken`]
//!
//! ## Quick Start
//!
//! ```
//! use querylito_async::{FetchError, Fingerprint, QueryConfig, QueryOptions, RequestCache};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache: RequestCache<String> = RequestCache::new("session");
//!
//! let config = QueryConfig::default()
//!     .with_stale_time(Duration::from_secs(300))
//!     .with_refetch_interval(Duration::from_secs(300));
//! let fingerprint = Fingerprint::new("greeting");
//! let options = QueryOptions::new(fingerprint, |_cancel: CancellationToken| async {
//!     Ok::<_, FetchError>("hello".to_string())
//! })
//! .with_config(config);
//!
//! let mut subscription = cache.subscribe(&options);
//! let ready = subscription.wait_for(|s| s.is_success()).await.unwrap();
//! assert_eq!(ready.data.as_deref(), Some("hello"));
//! # }
//! ```
//!
//! ## Sessions
//!
//! A [`RequestCache`] belongs to one consumer. Keep one per interactive
//! session and create a throwaway one per non-interactive render; do not
//! share a cache between the two.
mod fetcher;
mod request_cache;
mod scheduler;
mod subscription;

pub use fetcher::{Fetcher, QueryOptions};
pub use request_cache::RequestCache;
pub use scheduler::RefreshScheduler;
pub use subscription::{Subscription, Unsubscribe};

pub use querylito_core::{
    FetchError, FetchStatus, Fingerprint, Param, QueryConfig, RetryPolicy, Snapshot,
};

#[cfg(feature = "stats")]
pub use querylito_core::CacheStats;

pub use tokio_util::sync::CancellationToken;
