use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use querylito_core::Fingerprint;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// When the next interval refresh of an entry is due.
pub(crate) enum RefreshDue {
    /// The entry is gone or has no subscribers; the timer should stop.
    Gone,
    /// A fetch is in flight; wait for it before computing the next deadline.
    Wait(watch::Receiver<bool>),
    /// Refresh at this instant.
    At(Instant),
    /// The next deadline lies beyond the clock's range.
    Never,
}

/// What a refresh timer acts on. Timers only hold a [`Weak`] reference and a
/// fingerprint, and ask the target whether the entry still exists every time
/// they wake up.
pub(crate) trait RefreshTarget: Send + Sync + 'static {
    fn refresh_due(&self, fingerprint: &Fingerprint, interval: Duration) -> RefreshDue;

    fn refresh(self: Arc<Self>, fingerprint: &Fingerprint);
}

struct Timer {
    interval: Duration,
    background: bool,
    handle: AbortHandle,
}

/// Interval refresh timers, keyed by fingerprint, plus the focus flag of the
/// consuming surface.
///
/// `start` and `stop` are idempotent. The cache starts a timer when an entry
/// with a `refetch_interval` gets its first subscriber and stops it when the
/// last one leaves or the entry is evicted.
///
/// While the surface is unfocused, timers of entries that do not allow
/// background refresh wait for focus instead of firing.
pub struct RefreshScheduler {
    timers: Mutex<HashMap<Fingerprint, Timer>>,
    focus: watch::Sender<bool>,
    runtime: Handle,
    shutdown: CancellationToken,
}

impl RefreshScheduler {
    pub(crate) fn new(runtime: Handle, shutdown: CancellationToken) -> Self {
        let (focus, _) = watch::channel(true);
        Self {
            timers: Mutex::new(HashMap::new()),
            focus,
            runtime,
            shutdown,
        }
    }

    /// Starts (or restarts with new settings) the timer for `fingerprint`.
    ///
    /// Returns `false` if an identical timer was already running.
    pub(crate) fn start(
        &self,
        fingerprint: &Fingerprint,
        interval: Duration,
        background: bool,
        target: Weak<dyn RefreshTarget>,
    ) -> bool {
        let mut timers = self.timers.lock();
        if let Some(timer) = timers.get(fingerprint) {
            if timer.interval == interval && timer.background == background {
                return false;
            }
            timer.handle.abort();
        }

        let task = run_timer(
            fingerprint.clone(),
            interval,
            background,
            target,
            self.focus.subscribe(),
            self.shutdown.clone(),
        );
        let handle = self.runtime.spawn(task).abort_handle();
        tracing::trace!(fingerprint = %fingerprint, ?interval, "refresh timer started");

        timers.insert(
            fingerprint.clone(),
            Timer {
                interval,
                background,
                handle,
            },
        );
        true
    }

    /// Stops the timer for `fingerprint`. Returns `false` if none was running.
    pub(crate) fn stop(&self, fingerprint: &Fingerprint) -> bool {
        match self.timers.lock().remove(fingerprint) {
            Some(timer) => {
                timer.handle.abort();
                tracing::trace!(fingerprint = %fingerprint, "refresh timer stopped");
                true
            }
            None => false,
        }
    }

    /// Records whether the consuming surface is focused.
    ///
    /// Returns `true` when this call moved the surface from unfocused to focused.
    pub(crate) fn set_focused(&self, focused: bool) -> bool {
        let previous = self.focus.send_replace(focused);
        !previous && focused
    }

    pub fn is_focused(&self) -> bool {
        *self.focus.borrow()
    }

    pub fn is_scheduled(&self, fingerprint: &Fingerprint) -> bool {
        self.timers.lock().contains_key(fingerprint)
    }

    /// Number of running refresh timers.
    pub fn active_timers(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.get_mut().drain() {
            timer.handle.abort();
        }
    }
}

async fn run_timer(
    fingerprint: Fingerprint,
    interval: Duration,
    background: bool,
    target: Weak<dyn RefreshTarget>,
    mut focus: watch::Receiver<bool>,
    shutdown: CancellationToken,
) {
    loop {
        let due = match target.upgrade() {
            Some(target) => target.refresh_due(&fingerprint, interval),
            None => return,
        };

        match due {
            RefreshDue::Gone | RefreshDue::Never => return,
            RefreshDue::Wait(mut done) => {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    finished = done.wait_for(|done| *done) => {
                        // the fetch task died without reporting back
                        if finished.is_err() {
                            return;
                        }
                    }
                }
                continue;
            }
            RefreshDue::At(at) => {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep_until(at.into()) => {}
                }
            }
        }

        if !background && !*focus.borrow_and_update() {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                changed = focus.wait_for(|focused| *focused) => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            // the refocus hook already refreshed stale entries
            continue;
        }

        match target.upgrade() {
            Some(target) => target.refresh(&fingerprint),
            None => return,
        }
    }
}
