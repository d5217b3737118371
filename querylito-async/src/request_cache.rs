#[cfg(feature = "stats")]
use querylito_core::CacheStats;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use querylito_core::{CacheEntry, FetchError, FetchId, Fingerprint, RetryPolicy, Snapshot};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::scheduler::{RefreshDue, RefreshScheduler, RefreshTarget};
use crate::subscription::{Detach, Subscription, Unsubscribe};
use crate::{Fetcher, QueryOptions};

/// Current time on the runtime clock, so paused test time applies.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// The fetch currently occupying an entry.
struct Pending {
    id: FetchId,
    cancel: CancellationToken,
    /// Flips to `true` once the fetch (including its retries) has finished.
    done: watch::Receiver<bool>,
}

/// Everything the cache keeps per fingerprint.
struct Slot<T> {
    entry: CacheEntry<T>,
    fetcher: Arc<dyn Fetcher<T>>,
    subscribers: Vec<(u64, mpsc::UnboundedSender<Snapshot<T>>)>,
    pending: Option<Pending>,
    gc: Option<AbortHandle>,
    gc_epoch: u64,
}

impl<T: Clone> Slot<T> {
    fn new(options: &QueryOptions<T>) -> Self {
        Self {
            entry: CacheEntry::new(options.config().clone()),
            fetcher: Arc::clone(options.fetcher()),
            subscribers: Vec::new(),
            pending: None,
            gc: None,
            gc_epoch: 0,
        }
    }

    /// Sends the current snapshot to every subscriber.
    ///
    /// Called with the entry locked, so subscribers observe changes of one
    /// fingerprint in the order they happened.
    fn notify(&self) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.entry.snapshot(now());
        for (_, sender) in &self.subscribers {
            // a closed receiver is about to unsubscribe
            let _ = sender.send(snapshot.clone());
        }
    }

    fn cancel_gc(&mut self) {
        if let Some(gc) = self.gc.take() {
            gc.abort();
        }
    }

    /// Cancels the in-flight fetch, if any. The entry is released right away
    /// so a replacement fetch can start before the old task winds down.
    fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.cancel.cancel();
                self.entry.record_cancelled(pending.id);
                true
            }
            None => false,
        }
    }
}

pub(crate) struct Inner<T> {
    name: String,
    entries: DashMap<Fingerprint, Slot<T>>,
    scheduler: RefreshScheduler,
    runtime: Handle,
    shutdown: CancellationToken,
    next_id: AtomicU64,
    #[cfg(feature = "stats")]
    stats: CacheStats,
}

/// A request cache: one entry per fingerprint, fresh for `stale_time`,
/// refreshed in the background, retried on failure and evicted `gc_time`
/// after its last subscriber leaves.
///
/// # Guarantees
///
/// - **Request collapsing**: at most one fetch is in flight per fingerprint;
///   every caller in that window observes the same result.
/// - **Stale-while-revalidate**: stale data stays readable while a refresh runs,
///   and a failed refresh sets `error` without dropping `data`.
/// - **Ordered notifications**: subscribers see the changes of one fingerprint
///   in the order they happened, including the terminal state of every fetch
///   before the next fetch starts.
/// - **Cancellation**: a cancelled fetch never counts as a failure and never
///   overwrites data or errors.
///
/// # Lifecycle
///
/// A `RequestCache` is a cheap handle (`Clone` shares the same entries).
/// Create one long-lived cache per interactive session and a separate,
/// short-lived one per non-interactive render; never share one between the
/// two. Dropping the last handle cancels every in-flight fetch and timer.
///
/// # Examples
///
/// ```
/// use querylito_async::{Fingerprint, FetchError, QueryOptions, RequestCache};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache: RequestCache<i32> = RequestCache::new("weather");
/// let fingerprint = Fingerprint::new("weather").with("lat", 51.5);
/// let options = QueryOptions::new(fingerprint, |_cancel: CancellationToken| async {
///     Ok::<_, FetchError>(18)
/// });
///
/// cache.prefetch(&options).await;
/// assert_eq!(cache.get(&options).data, Some(18));
/// # }
/// ```
pub struct RequestCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RequestCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for RequestCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCache")
            .field("name", &self.inner.name)
            .field("entries", &self.inner.entries.len())
            .field("timers", &self.inner.scheduler.active_timers())
            .finish()
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<T> RequestCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a cache that spawns its fetches and timers on the current
    /// Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_runtime(name, Handle::current())
    }

    /// Creates a cache that spawns its fetches and timers on `runtime`.
    pub fn with_runtime(name: impl Into<String>, runtime: Handle) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                entries: DashMap::new(),
                scheduler: RefreshScheduler::new(runtime.clone(), shutdown.clone()),
                runtime,
                shutdown,
                next_id: AtomicU64::new(1),
                #[cfg(feature = "stats")]
                stats: CacheStats::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the current snapshot for `options`, starting a fetch first if
    /// the entry is missing, stale or failed.
    ///
    /// Never waits: the fetch runs in the background and the returned
    /// snapshot reflects the state right after it was started.
    pub fn get(&self, options: &QueryOptions<T>) -> Snapshot<T> {
        let snapshot = {
            let mut slot = self.inner.touch(options);
            let fresh = self.inner.refresh_slot(&mut slot);

            #[cfg(feature = "stats")]
            if fresh {
                self.inner.stats.record_hit();
            } else {
                self.inner.stats.record_miss();
            }
            #[cfg(not(feature = "stats"))]
            let _ = fresh;

            slot.entry.snapshot(now())
        };
        self.inner.sync_timer(options);
        snapshot
    }

    /// Returns the current snapshot without creating the entry or starting a fetch.
    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<Snapshot<T>> {
        self.inner
            .entries
            .get(fingerprint)
            .map(|slot| slot.entry.snapshot(now()))
    }

    /// Starts a fetch if the entry is missing, failed or stale and nothing
    /// is in flight.
    pub fn ensure_fresh(&self, options: &QueryOptions<T>) {
        self.inner.ensure_fresh(options);
    }

    /// Like [`ensure_fresh`](Self::ensure_fresh), but waits until the
    /// entry has no fetch in flight anymore.
    ///
    /// Used to warm the cache before a value is displayed.
    pub async fn prefetch(&self, options: &QueryOptions<T>) {
        self.inner.ensure_fresh(options);
        loop {
            let done = self
                .inner
                .entries
                .get(options.fingerprint())
                .and_then(|slot| slot.pending.as_ref().map(|pending| pending.done.clone()));
            let Some(mut done) = done else {
                break;
            };
            // the fetch task died without reporting back
            if done.wait_for(|done| *done).await.is_err() {
                break;
            }
        }
    }

    /// Subscribes to the entry of `options`.
    ///
    /// Every change of the entry (fetch start, success, failure, retry
    /// scheduled, cancellation, invalidation) is delivered as a [`Snapshot`]
    /// through the returned [`Subscription`]. Dropping the subscription
    /// unsubscribes.
    pub fn subscribe(&self, options: &QueryOptions<T>) -> Subscription<T> {
        let id = self.inner.next_id();
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut slot = self.inner.touch(options);
            slot.subscribers.push((id, sender));
            if slot.entry.add_subscriber() == 1 {
                slot.cancel_gc();
            }
            self.inner.refresh_slot(&mut slot);
        }
        self.inner.sync_timer(options);

        Subscription::new(options.fingerprint().clone(), id, receiver, self.inner.detach_handle())
    }

    /// Callback form of [`subscribe`](Self::subscribe): `listener` is invoked
    /// with every new snapshot, in order, until the returned guard is
    /// dropped or [`Unsubscribe::unsubscribe`] is called.
    pub fn watch<F>(&self, options: &QueryOptions<T>, listener: F) -> Unsubscribe
    where
        F: Fn(Snapshot<T>) + Send + Sync + 'static,
    {
        let mut subscription = self.subscribe(options);
        let (fingerprint, id) = (subscription.fingerprint().clone(), subscription.id());
        let task = self.inner.runtime.spawn(async move {
            while let Some(snapshot) = subscription.recv().await {
                listener(snapshot);
            }
        });

        Unsubscribe::new(fingerprint, id, self.inner.detach_handle(), task.abort_handle())
    }

    /// Marks the entry stale without discarding its data.
    ///
    /// Subscribers keep seeing the old value until the refresh resolves. An
    /// entry with subscribers is refreshed right away; others are refreshed
    /// on their next read. Returns `false` if there is no such entry.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let Some(mut slot) = self.inner.entries.get_mut(fingerprint) else {
            return false;
        };
        slot.entry.invalidate();
        tracing::debug!(cache = %self.inner.name, fingerprint = %fingerprint, "invalidated");
        if slot.entry.subscriber_count() == 0 {
            slot.notify();
            return true;
        }

        // a fetch requested before the invalidation is restarted
        let cancelled = slot.cancel_pending();
        if cancelled {
            #[cfg(feature = "stats")]
            self.inner.stats.record_cancellation();
            slot.notify();
        }
        if slot.entry.needs_fetch(now()) {
            self.inner.start_fetch(&mut slot);
        } else if !cancelled {
            slot.notify();
        }
        true
    }

    /// Invalidates every entry of a request family. Returns how many were hit.
    pub fn invalidate_family(&self, family: &str) -> usize {
        let matching: Vec<Fingerprint> = self
            .inner
            .entries
            .iter()
            .filter(|slot| slot.key().family() == family)
            .map(|slot| slot.key().clone())
            .collect();
        matching.iter().filter(|fp| self.invalidate(fp)).count()
    }

    /// Cancels the in-flight fetch of an entry. Safe to call when nothing
    /// is running. Returns whether a fetch was cancelled.
    pub fn cancel(&self, fingerprint: &Fingerprint) -> bool {
        let Some(mut slot) = self.inner.entries.get_mut(fingerprint) else {
            return false;
        };
        if !slot.cancel_pending() {
            return false;
        }
        #[cfg(feature = "stats")]
        self.inner.stats.record_cancellation();
        tracing::debug!(cache = %self.inner.name, fingerprint = %fingerprint, "fetch cancelled");
        slot.notify();
        true
    }

    /// Evicts an entry right away, cancelling its fetch and timers.
    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        match self.inner.entries.remove(fingerprint) {
            Some((fingerprint, slot)) => {
                self.inner.evicted(&fingerprint, slot);
                true
            }
            None => false,
        }
    }

    /// Stores `value` as freshly fetched data for `options`.
    pub fn set_data(&self, options: &QueryOptions<T>, value: T) {
        let mut slot = self.inner.touch(options);
        slot.entry.set_data(value, now());
        slot.notify();
    }

    /// Tells the cache whether the consuming surface is focused.
    ///
    /// Regaining focus refreshes every subscribed stale entry that allows
    /// refetch on focus.
    pub fn set_focused(&self, focused: bool) {
        if self.inner.scheduler.set_focused(focused) {
            self.inner.refocus();
        }
    }

    pub fn is_focused(&self) -> bool {
        self.inner.scheduler.is_focused()
    }

    /// Refreshes every subscribed, stale entry that allows refetch on focus.
    pub fn refocus(&self) {
        self.inner.refocus();
    }

    pub fn subscriber_count(&self, fingerprint: &Fingerprint) -> usize {
        self.inner
            .entries
            .get(fingerprint)
            .map_or(0, |slot| slot.entry.subscriber_count())
    }

    /// Whether an interval refresh timer runs for `fingerprint`.
    pub fn is_scheduled(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.scheduler.is_scheduled(fingerprint)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.entries.contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn detach_handle(self: &Arc<Self>) -> Weak<dyn Detach> {
        let inner: Weak<Self> = Arc::downgrade(self);
        inner
    }

    /// Looks up (or creates) the slot for `options` and stores its latest
    /// fetcher and config. A config change supersedes the fetch in flight.
    ///
    /// New slots, and unsubscribed slots whose `gc_time` changed, get a
    /// fresh GC timer.
    fn touch(self: &Arc<Self>, options: &QueryOptions<T>) -> RefMut<'_, Fingerprint, Slot<T>> {
        let mut created = false;
        let mut slot = self
            .entries
            .entry(options.fingerprint().clone())
            .or_insert_with(|| {
                created = true;
                Slot::new(options)
            });

        if created {
            self.schedule_gc(&mut slot);
            return slot;
        }

        slot.fetcher = Arc::clone(options.fetcher());
        let gc_time = slot.entry.config().gc_time;
        if !slot.entry.set_config(options.config().clone()) {
            return slot;
        }
        if slot.cancel_pending() {
            #[cfg(feature = "stats")]
            self.stats.record_cancellation();
            tracing::debug!(
                cache = %self.name,
                fingerprint = %options.fingerprint(),
                "config changed, superseding fetch in flight"
            );
            slot.notify();
        }
        if slot.entry.config().gc_time != gc_time && slot.entry.subscriber_count() == 0 {
            self.schedule_gc(&mut slot);
        }
        slot
    }

    fn ensure_fresh(self: &Arc<Self>, options: &QueryOptions<T>) {
        {
            let mut slot = self.touch(options);
            self.refresh_slot(&mut slot);
        }
        self.sync_timer(options);
    }

    /// Starts a fetch if the slot needs one. Returns whether the slot held
    /// fresh data before that.
    fn refresh_slot(self: &Arc<Self>, slot: &mut RefMut<'_, Fingerprint, Slot<T>>) -> bool {
        let now = now();
        let fresh = slot.entry.data().is_some() && !slot.entry.is_stale(now);
        if slot.entry.needs_fetch(now) {
            self.start_fetch(slot);
        }
        fresh
    }

    fn start_fetch(self: &Arc<Self>, slot: &mut RefMut<'_, Fingerprint, Slot<T>>) {
        let id = FetchId::new(self.next_id());
        if !slot.entry.begin_fetch(id) {
            return;
        }

        let cancel = self.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(false);
        slot.pending = Some(Pending {
            id,
            cancel: cancel.clone(),
            done: done_rx,
        });

        #[cfg(feature = "stats")]
        self.stats.record_fetch();

        let fingerprint = slot.key().clone();
        tracing::debug!(
            cache = %self.name,
            fingerprint = %fingerprint,
            fetch = id.get(),
            "starting fetch"
        );
        slot.notify();

        let span = tracing::debug_span!("fetch", cache = %self.name, fingerprint = %fingerprint);
        let task = run_fetch(
            Arc::downgrade(self),
            fingerprint,
            id,
            Arc::clone(&slot.fetcher),
            slot.entry.config().retry.clone(),
            cancel,
            done_tx,
        );
        self.runtime.spawn(task.instrument(span));
    }

    /// (Re)arms the GC timer of a slot that has no subscribers.
    fn schedule_gc(self: &Arc<Self>, slot: &mut RefMut<'_, Fingerprint, Slot<T>>) {
        slot.cancel_gc();
        slot.gc_epoch += 1;

        let epoch = slot.gc_epoch;
        let gc_time = slot.entry.config().gc_time;
        let fingerprint = slot.key().clone();
        let cache = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        let task = self.runtime.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(gc_time) => {
                    if let Some(inner) = cache.upgrade() {
                        inner.collect(&fingerprint, epoch);
                    }
                }
            }
        });
        slot.gc = Some(task.abort_handle());
    }

    /// Evicts an entry whose GC window elapsed, unless it got a subscriber
    /// (or a newer GC timer) in the meantime.
    fn collect(&self, fingerprint: &Fingerprint, epoch: u64) {
        let removed = self.entries.remove_if(fingerprint, |_, slot| {
            slot.gc_epoch == epoch && slot.entry.subscriber_count() == 0
        });
        if let Some((fingerprint, slot)) = removed {
            tracing::trace!(cache = %self.name, fingerprint = %fingerprint, "garbage collected");
            self.evicted(&fingerprint, slot);
        }
    }

    fn evicted(&self, fingerprint: &Fingerprint, mut slot: Slot<T>) {
        if slot.cancel_pending() {
            #[cfg(feature = "stats")]
            self.stats.record_cancellation();
        }
        slot.cancel_gc();
        self.scheduler.stop(fingerprint);
        #[cfg(feature = "stats")]
        self.stats.record_eviction();
    }

    pub(crate) fn unsubscribe(self: &Arc<Self>, fingerprint: &Fingerprint, id: u64) {
        let mut stop_timer = false;
        if let Some(mut slot) = self.entries.get_mut(fingerprint) {
            let before = slot.subscribers.len();
            slot.subscribers.retain(|(subscriber, _)| *subscriber != id);
            if slot.subscribers.len() == before {
                return;
            }
            if slot.entry.remove_subscriber() == 0 {
                self.schedule_gc(&mut slot);
                stop_timer = true;
            }
        }
        if stop_timer {
            self.scheduler.stop(fingerprint);
        }
    }

    /// Starts, restarts or stops the interval timer to match the entry's
    /// config and subscriber count.
    fn sync_timer(self: &Arc<Self>, options: &QueryOptions<T>) {
        let fingerprint = options.fingerprint();
        let wanted = self.entries.get(fingerprint).and_then(|slot| {
            if slot.entry.subscriber_count() == 0 {
                return None;
            }
            let config = slot.entry.config();
            config
                .interval()
                .map(|interval| (interval, config.refetch_interval_in_background))
        });

        match wanted {
            Some((interval, background)) => {
                let inner: Weak<Self> = Arc::downgrade(self);
                let target: Weak<dyn RefreshTarget> = inner;
                self.scheduler.start(fingerprint, interval, background, target);
            }
            None => {
                self.scheduler.stop(fingerprint);
            }
        }
    }

    fn refocus(self: &Arc<Self>) {
        let now = now();
        let stale: Vec<Fingerprint> = self
            .entries
            .iter()
            .filter(|slot| {
                let entry = &slot.entry;
                entry.subscriber_count() > 0
                    && entry.config().refetch_on_focus
                    && entry.needs_fetch(now)
            })
            .map(|slot| slot.key().clone())
            .collect();

        for fingerprint in stale {
            tracing::debug!(cache = %self.name, fingerprint = %fingerprint, "refreshing on focus");
            self.refresh_subscribed(&fingerprint);
        }
    }

    /// Background refresh path: only entries with subscribers are refreshed.
    fn refresh_subscribed(self: &Arc<Self>, fingerprint: &Fingerprint) {
        if let Some(mut slot) = self.entries.get_mut(fingerprint) {
            if slot.entry.subscriber_count() > 0 {
                self.refresh_slot(&mut slot);
            }
        }
    }

    fn complete_success(&self, fingerprint: &Fingerprint, id: FetchId, value: T) {
        let Some(mut slot) = self.entries.get_mut(fingerprint) else {
            return;
        };
        if !slot.entry.record_success(id, value, now()) {
            return;
        }
        slot.pending = None;
        tracing::debug!(cache = %self.name, fingerprint = %fingerprint, "fetch succeeded");
        slot.notify();
    }

    fn complete_cancelled(&self, fingerprint: &Fingerprint, id: FetchId) {
        let Some(mut slot) = self.entries.get_mut(fingerprint) else {
            return;
        };
        if !slot.entry.record_cancelled(id) {
            return;
        }
        slot.pending = None;
        #[cfg(feature = "stats")]
        self.stats.record_cancellation();
        slot.notify();
    }

    fn complete_exhausted(&self, fingerprint: &Fingerprint, id: FetchId, error: FetchError) {
        let Some(mut slot) = self.entries.get_mut(fingerprint) else {
            return;
        };
        if !slot.entry.record_exhausted(id, error.clone()) {
            return;
        }
        tracing::warn!(
            cache = %self.name,
            fingerprint = %fingerprint,
            error = %error,
            "fetch failed, giving up"
        );
        slot.pending = None;
        #[cfg(feature = "stats")]
        self.stats.record_failure();
        slot.notify();
    }

    fn schedule_retry(
        &self,
        fingerprint: &Fingerprint,
        id: FetchId,
        attempt: u32,
        delay: Duration,
        error: &FetchError,
    ) -> bool {
        let Some(mut slot) = self.entries.get_mut(fingerprint) else {
            return false;
        };
        if !slot.entry.record_retry_scheduled(id, attempt, delay) {
            return false;
        }
        #[cfg(feature = "stats")]
        self.stats.record_retry();
        tracing::debug!(
            cache = %self.name,
            fingerprint = %fingerprint,
            attempt,
            ?delay,
            error = %error,
            "fetch failed, retrying"
        );
        slot.notify();
        true
    }

    fn retry_started(&self, fingerprint: &Fingerprint, id: FetchId) -> bool {
        let Some(mut slot) = self.entries.get_mut(fingerprint) else {
            return false;
        };
        if !slot.entry.record_retry_started(id) {
            return false;
        }
        slot.notify();
        true
    }
}

impl<T> RefreshTarget for Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn refresh_due(&self, fingerprint: &Fingerprint, interval: Duration) -> RefreshDue {
        let Some(slot) = self.entries.get(fingerprint) else {
            return RefreshDue::Gone;
        };
        if slot.entry.subscriber_count() == 0 {
            return RefreshDue::Gone;
        }
        if let Some(pending) = &slot.pending {
            return RefreshDue::Wait(pending.done.clone());
        }

        let now = now();
        let due = slot
            .entry
            .fetched_at()
            .and_then(|fetched_at| fetched_at.checked_add(interval))
            .filter(|due| *due > now)
            .or_else(|| now.checked_add(interval));
        match due {
            Some(due) => RefreshDue::At(due),
            None => RefreshDue::Never,
        }
    }

    fn refresh(self: Arc<Self>, fingerprint: &Fingerprint) {
        self.refresh_subscribed(fingerprint);
    }
}

impl<T> Detach for Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn detach(self: Arc<Self>, fingerprint: &Fingerprint, id: u64) {
        self.unsubscribe(fingerprint, id);
    }
}

/// Drives one fetch of `fingerprint`, including its retries, and reports
/// every transition back to the cache.
async fn run_fetch<T>(
    cache: Weak<Inner<T>>,
    fingerprint: Fingerprint,
    id: FetchId,
    fetcher: Arc<dyn Fetcher<T>>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
) where
    T: Clone + Send + Sync + 'static,
{
    let mut attempt = 0;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = fetcher.fetch(cancel.clone()) => result,
        };

        let Some(inner) = cache.upgrade() else {
            break;
        };
        let error = match result {
            Ok(value) => {
                inner.complete_success(&fingerprint, id, value);
                break;
            }
            Err(error) if error.is_cancelled() || cancel.is_cancelled() => {
                inner.complete_cancelled(&fingerprint, id);
                break;
            }
            Err(error) => error,
        };

        if !retry.should_retry(attempt, &error) {
            inner.complete_exhausted(&fingerprint, id, error);
            break;
        }
        let delay = retry.delay_for(attempt);
        attempt += 1;
        if !inner.schedule_retry(&fingerprint, id, attempt, delay, &error) {
            break;
        }
        drop(inner);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Some(inner) = cache.upgrade() {
                    inner.complete_cancelled(&fingerprint, id);
                }
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match cache.upgrade() {
            Some(inner) if inner.retry_started(&fingerprint, id) => {}
            _ => break,
        }
    }
    done.send_replace(true);
}
