use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use querylito_core::{FetchError, Fingerprint, QueryConfig};
use tokio_util::sync::CancellationToken;

/// Produces the value of a request.
///
/// The cache calls `fetch` at most once at a time per fingerprint, and again
/// for every retry. Implementations must be idempotent and should stop work
/// as soon as `cancel` fires; returning [`FetchError::Cancelled`] at that
/// point is enough.
///
/// Any `Fn(CancellationToken) -> impl Future<Output = Result<T, FetchError>>`
/// closure is a fetcher.
///
/// # Examples
///
/// ```
/// use querylito_async::{Fetcher, FetchError};
/// use tokio_util::sync::CancellationToken;
///
/// fn constant(value: i32) -> impl Fetcher<i32> {
///     move |_cancel: CancellationToken| async move { Ok::<_, FetchError>(value) }
/// }
/// ```
pub trait Fetcher<T>: Send + Sync + 'static {
    fn fetch(&self, cancel: CancellationToken) -> BoxFuture<'static, Result<T, FetchError>>;
}

impl<T, F, Fut> Fetcher<T> for F
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    fn fetch(&self, cancel: CancellationToken) -> BoxFuture<'static, Result<T, FetchError>> {
        self(cancel).boxed()
    }
}

/// Everything the cache needs to serve one request: its fingerprint, its
/// family's config, and the fetcher that produces it.
///
/// The cache keeps the most recent options per fingerprint, so background
/// refreshes and retries always use the latest fetcher and config.
pub struct QueryOptions<T> {
    fingerprint: Fingerprint,
    config: QueryConfig,
    fetcher: Arc<dyn Fetcher<T>>,
}

impl<T> QueryOptions<T> {
    /// Options with the default [`QueryConfig`].
    pub fn new(fingerprint: Fingerprint, fetcher: impl Fetcher<T>) -> Self {
        Self::from_arc(fingerprint, Arc::new(fetcher))
    }

    pub fn from_arc(fingerprint: Fingerprint, fetcher: Arc<dyn Fetcher<T>>) -> Self {
        Self {
            fingerprint,
            config: QueryConfig::default(),
            fetcher,
        }
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher<T>> {
        &self.fetcher
    }
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        Self {
            fingerprint: self.fingerprint.clone(),
            config: self.config.clone(),
            fetcher: Arc::clone(&self.fetcher),
        }
    }
}

impl<T> fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("fingerprint", &self.fingerprint)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
