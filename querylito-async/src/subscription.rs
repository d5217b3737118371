use std::fmt;
use std::sync::{Arc, Weak};

use querylito_core::{Fingerprint, Snapshot};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Removes one subscriber from a cache entry. Implemented by the cache so
/// that subscription handles do not have to carry its type bounds.
pub(crate) trait Detach: Send + Sync + 'static {
    fn detach(self: Arc<Self>, fingerprint: &Fingerprint, id: u64);
}

/// A live subscription to one cache entry.
///
/// Snapshots arrive in the order the entry changed. The subscription keeps
/// the entry alive (it will not be garbage collected) and keeps its interval
/// refresh running until it is dropped.
///
/// `recv` returns `None` once the entry was removed from the cache or the
/// cache itself was dropped.
pub struct Subscription<T> {
    fingerprint: Fingerprint,
    id: u64,
    receiver: mpsc::UnboundedReceiver<Snapshot<T>>,
    cache: Weak<dyn Detach>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        fingerprint: Fingerprint,
        id: u64,
        receiver: mpsc::UnboundedReceiver<Snapshot<T>>,
        cache: Weak<dyn Detach>,
    ) -> Self {
        Self {
            fingerprint,
            id,
            receiver,
            cache,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next snapshot.
    pub async fn recv(&mut self) -> Option<Snapshot<T>> {
        self.receiver.recv().await
    }

    /// Returns the next snapshot if one is already queued.
    pub fn try_recv(&mut self) -> Option<Snapshot<T>> {
        self.receiver.try_recv().ok()
    }

    /// Drains the queue and returns the most recent snapshot, if any.
    pub fn latest(&mut self) -> Option<Snapshot<T>> {
        let mut latest = None;
        while let Ok(snapshot) = self.receiver.try_recv() {
            latest = Some(snapshot);
        }
        latest
    }

    /// Waits for the first snapshot matching `predicate`, skipping the others.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<Snapshot<T>>
    where
        F: FnMut(&Snapshot<T>) -> bool,
    {
        while let Some(snapshot) = self.receiver.recv().await {
            if predicate(&snapshot) {
                return Some(snapshot);
            }
        }
        None
    }

    /// Ends the subscription. Same as dropping it.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.detach(&self.fingerprint, self.id);
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("fingerprint", &self.fingerprint)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`RequestCache::watch`](crate::RequestCache::watch).
///
/// Dropping it (or calling [`unsubscribe`](Self::unsubscribe)) removes the
/// listener. Calling it after the cache is gone is a no-op.
#[must_use = "the listener is removed when the guard is dropped"]
pub struct Unsubscribe {
    fingerprint: Fingerprint,
    id: u64,
    cache: Weak<dyn Detach>,
    task: AbortHandle,
}

impl Unsubscribe {
    pub(crate) fn new(
        fingerprint: Fingerprint,
        id: u64,
        cache: Weak<dyn Detach>,
        task: AbortHandle,
    ) -> Self {
        Self {
            fingerprint,
            id,
            cache,
            task,
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.detach(&self.fingerprint, self.id);
        }
        self.task.abort();
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}
