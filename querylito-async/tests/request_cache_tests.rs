//! Integration tests for fetching, collapsing, freshness, retries and eviction

use parking_lot::Mutex;
use querylito_async::{
    CancellationToken, FetchError, FetchStatus, Fetcher, Fingerprint, QueryConfig, QueryOptions,
    RequestCache, RetryPolicy,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn five_minutes() -> QueryConfig {
    QueryConfig::default()
        .with_stale_time(Duration::from_secs(5 * 60))
        .with_retry(RetryPolicy::never())
}

/// Returns the number of the call (1, 2, ...) after `delay`.
fn counting(calls: &Arc<AtomicUsize>, delay: Duration) -> impl Fetcher<usize> {
    let calls = Arc::clone(calls);
    move |_cancel: CancellationToken| {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            tokio::time::sleep(delay).await;
            Ok::<_, FetchError>(call)
        }
    }
}

/// Fails with HTTP 500 for the first `failures` calls, then returns the call number.
fn flaky(calls: &Arc<AtomicUsize>, failures: usize) -> impl Fetcher<usize> {
    let calls = Arc::clone(calls);
    move |_cancel: CancellationToken| {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if call <= failures {
                Err(FetchError::http_status("https://api.test/weather", 500, None))
            } else {
                Ok(call)
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_share_one_fetch() {
    init_tracing();
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::new(
        Fingerprint::new("weather").with("lat", 51.5).with("lon", -0.13),
        counting(&calls, Duration::from_millis(100)),
    )
    .with_config(five_minutes());

    let first = cache.get(&options);
    assert!(first.is_loading);
    assert_eq!(first.status, FetchStatus::Fetching);

    let second = cache.get(&options);
    assert!(second.is_fetching);

    cache.prefetch(&options).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let third = cache.get(&options);
    assert_eq!(third.data, Some(1));
    assert!(!third.is_stale);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_two_subscribers_in_one_tick_receive_the_same_result() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::new(
        Fingerprint::new("weather").with("lat", 51.5).with("lon", -0.13),
        counting(&calls, Duration::from_millis(50)),
    )
    .with_config(five_minutes());

    let mut a = cache.subscribe(&options);
    let mut b = cache.subscribe(&options);

    let from_a = a.wait_for(|s| s.is_success()).await.unwrap();
    let from_b = b.wait_for(|s| s.is_success()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(from_a, from_b);
    assert_eq!(cache.subscriber_count(options.fingerprint()), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_data_is_served_while_revalidating() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = counting(&calls, Duration::from_secs(1));
    let options = QueryOptions::new(Fingerprint::new("geo"), fetcher)
        .with_config(five_minutes());

    cache.prefetch(&options).await;

    // still fresh
    tokio::time::sleep(Duration::from_secs(299)).await;
    let fresh = cache.get(&options);
    assert_eq!(fresh.data, Some(1));
    assert!(!fresh.is_fetching);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let stale = cache.get(&options);
    assert_eq!(stale.data, Some(1));
    assert!(stale.is_stale);
    assert!(stale.is_fetching);
    assert!(!stale.is_loading);

    cache.prefetch(&options).await;
    assert_eq!(cache.get(&options).data, Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_previous_data() {
    let cache = RequestCache::new("test");
    let fingerprint = Fingerprint::new("weather").with("lat", 37.77).with("lon", -122.42);
    let healthy = QueryOptions::new(fingerprint.clone(), |_cancel: CancellationToken| async {
        Ok::<_, FetchError>(18)
    })
    .with_config(five_minutes());

    cache.prefetch(&healthy).await;
    tokio::time::sleep(Duration::from_secs(5 * 60 + 30)).await;

    // a background refresh with nobody subscribed
    let broken = QueryOptions::new(fingerprint.clone(), |_cancel: CancellationToken| async {
        Err::<i32, _>(FetchError::network("https://api.test/forecast", "connection reset"))
    })
    .with_config(five_minutes());
    cache.prefetch(&broken).await;

    let snapshot = cache.peek(&fingerprint).unwrap();
    assert_eq!(snapshot.data, Some(18));
    assert!(snapshot.is_stale);
    assert!(matches!(snapshot.error, Some(FetchError::Transport { .. })));
    assert_eq!(snapshot.status, FetchStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_retries_back_off_exponentially() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let retry = RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(8));
    let options = QueryOptions::new(Fingerprint::new("weather"), flaky(&calls, 2))
        .with_config(QueryConfig::default().with_retry(retry));

    let started = tokio::time::Instant::now();
    let mut subscription = cache.subscribe(&options);

    let mut statuses = Vec::new();
    while let Some(snapshot) = subscription.recv().await {
        statuses.push(snapshot.status);
        if snapshot.status == FetchStatus::Success {
            assert_eq!(snapshot.data, Some(3));
            assert_eq!(snapshot.retry_count, 0);
            break;
        }
    }

    assert_eq!(
        statuses,
        vec![
            FetchStatus::Fetching,
            FetchStatus::Retrying {
                attempt: 1,
                delay: Duration::from_secs(1)
            },
            FetchStatus::Fetching,
            FetchStatus::Retrying {
                attempt: 2,
                delay: Duration::from_secs(2)
            },
            FetchStatus::Fetching,
            FetchStatus::Success,
        ]
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_report_the_last_error() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let retry = RetryPolicy::new(2, Duration::from_millis(100), Duration::from_secs(1));
    let options = QueryOptions::new(Fingerprint::new("weather"), flaky(&calls, usize::MAX))
        .with_config(QueryConfig::default().with_retry(retry));

    cache.prefetch(&options).await;

    let snapshot = cache.peek(options.fingerprint()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(snapshot.status, FetchStatus::Failed);
    assert_eq!(snapshot.retry_count, 3);
    assert_eq!(snapshot.data, None);
    assert_eq!(snapshot.error.as_ref().and_then(FetchError::status), Some(500));

    #[cfg(feature = "stats")]
    {
        assert_eq!(cache.stats().fetches(), 1);
        assert_eq!(cache.stats().retries(), 2);
        assert_eq!(cache.stats().failures(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_fetch_is_not_a_failure() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = counting(&calls, Duration::from_secs(10));
    let options = QueryOptions::new(Fingerprint::new("weather"), fetcher)
        .with_config(QueryConfig::default().with_retry(RetryPolicy::default()));

    let mut subscription = cache.subscribe(&options);
    assert_eq!(subscription.recv().await.unwrap().status, FetchStatus::Fetching);

    assert!(cache.cancel(options.fingerprint()));
    assert!(!cache.cancel(options.fingerprint()));

    let snapshot = subscription.recv().await.unwrap();
    assert_eq!(snapshot.status, FetchStatus::Idle);
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.retry_count, 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.peek(options.fingerprint()).unwrap().data, None);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_error_from_fetcher_is_never_retried() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let options = QueryOptions::new(Fingerprint::new("geo"), move |_cancel: CancellationToken| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<i32, _>(FetchError::Cancelled) }
    });

    cache.prefetch(&options).await;

    let snapshot = cache.peek(options.fingerprint()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.status, FetchStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_query_never_fetches() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = counting(&calls, Duration::ZERO);
    let options = QueryOptions::new(Fingerprint::new("geo").with("q", "a"), fetcher)
        .with_config(QueryConfig::default().with_enabled(false));

    let snapshot = cache.get(&options);
    assert!(snapshot.is_disabled());
    assert!(!snapshot.is_loading);
    assert!(!snapshot.is_error());

    let _subscription = cache.subscribe(&options);
    cache.prefetch(&options).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unused_entries_are_collected_after_gc_time() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let config = five_minutes().with_gc_time(Duration::from_secs(60));
    let read_once = QueryOptions::new(Fingerprint::new("ip"), counting(&calls, Duration::ZERO))
        .with_config(config.clone());
    let watched = QueryOptions::new(Fingerprint::new("weather"), counting(&calls, Duration::ZERO))
        .with_config(config);

    cache.prefetch(&read_once).await;
    let subscription = cache.subscribe(&watched);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!cache.contains(read_once.fingerprint()));
    assert!(cache.contains(watched.fingerprint()));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(cache.contains(watched.fingerprint()));

    drop(subscription);
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(cache.contains(watched.fingerprint()));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(cache.is_empty());

    #[cfg(feature = "stats")]
    assert_eq!(cache.stats().evictions(), 2);

    // a read after eviction starts over like the first one
    let again = cache.get(&read_once);
    assert!(again.is_loading);
    assert_eq!(again.data, None);
    cache.prefetch(&read_once).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(cache.peek(read_once.fingerprint()).unwrap().data, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_changing_gc_time_rearms_collection() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher: Arc<dyn Fetcher<usize>> = Arc::new(counting(&calls, Duration::ZERO));
    let fingerprint = Fingerprint::new("ip");
    let short = QueryOptions::from_arc(fingerprint.clone(), Arc::clone(&fetcher))
        .with_config(five_minutes().with_gc_time(Duration::from_secs(60)));
    let long = QueryOptions::from_arc(fingerprint.clone(), fetcher)
        .with_config(five_minutes().with_gc_time(Duration::from_secs(300)));

    cache.prefetch(&short).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(cache.get(&long).data, Some(1));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(cache.contains(&fingerprint));
    tokio::time::sleep(Duration::from_secs(241)).await;
    assert!(!cache.contains(&fingerprint));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribing_cancels_collection() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::new(Fingerprint::new("weather"), counting(&calls, Duration::ZERO))
        .with_config(five_minutes().with_gc_time(Duration::from_secs(60)));

    drop(cache.subscribe(&options));
    tokio::time::sleep(Duration::from_secs(30)).await;
    let _subscription = cache.subscribe(&options);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(cache.contains(options.fingerprint()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_watch_delivers_snapshots_in_order_until_unsubscribed() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = counting(&calls, Duration::from_millis(10));
    let options = QueryOptions::new(Fingerprint::new("weather"), fetcher)
        .with_config(five_minutes());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let guard = cache.watch(&options, move |snapshot| {
        sink.lock().push((snapshot.status, snapshot.data));
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        *seen.lock(),
        vec![(FetchStatus::Fetching, None), (FetchStatus::Success, Some(1))]
    );

    guard.unsubscribe();
    assert_eq!(cache.subscriber_count(options.fingerprint()), 0);

    cache.invalidate(options.fingerprint());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(seen.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_refreshes_subscribed_entries_and_keeps_data() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = counting(&calls, Duration::from_millis(10));
    let options = QueryOptions::new(Fingerprint::new("weather"), fetcher)
        .with_config(five_minutes());

    let mut subscription = cache.subscribe(&options);
    subscription.wait_for(|s| s.is_success()).await.unwrap();

    assert!(cache.invalidate(options.fingerprint()));
    let refreshing = subscription.recv().await.unwrap();
    assert_eq!(refreshing.data, Some(1));
    assert!(refreshing.is_stale);
    assert!(refreshing.is_fetching);

    let refreshed = subscription.wait_for(|s| s.data == Some(2)).await.unwrap();
    assert!(!refreshed.is_stale);
    assert!(!cache.invalidate(&Fingerprint::new("missing")));
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_during_a_refresh_restarts_it() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = counting(&calls, Duration::from_millis(100));
    let options = QueryOptions::new(Fingerprint::new("weather"), fetcher)
        .with_config(five_minutes());

    let mut subscription = cache.subscribe(&options);
    subscription.wait_for(|s| s.is_success()).await.unwrap();

    cache.invalidate(options.fingerprint());
    tokio::time::sleep(Duration::from_millis(10)).await;
    cache.invalidate(options.fingerprint());
    tokio::time::sleep(Duration::from_millis(500)).await;

    cache.ensure_fresh(&options);
    let snapshot = cache.get(&options);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(snapshot.data, Some(3));
    assert!(!snapshot.is_stale);
    assert!(!snapshot.is_fetching);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_during_an_unwatched_fetch_keeps_the_result_stale() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = counting(&calls, Duration::from_millis(100));
    let options = QueryOptions::new(Fingerprint::new("ip"), fetcher)
        .with_config(five_minutes());

    cache.get(&options);
    tokio::time::sleep(Duration::from_millis(10)).await;
    cache.invalidate(options.fingerprint());
    tokio::time::sleep(Duration::from_millis(500)).await;

    let snapshot = cache.peek(options.fingerprint()).unwrap();
    assert_eq!(snapshot.data, Some(1));
    assert!(snapshot.is_stale);

    cache.prefetch(&options).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!cache.peek(options.fingerprint()).unwrap().is_stale);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_family_marks_every_member_stale() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    for q in ["lon", "par", "tok"] {
        let fetcher = counting(&calls, Duration::ZERO);
        let options = QueryOptions::new(Fingerprint::new("geo").with("q", q), fetcher)
            .with_config(five_minutes());
        cache.prefetch(&options).await;
    }
    let other = QueryOptions::new(Fingerprint::new("ip"), counting(&calls, Duration::ZERO))
        .with_config(five_minutes());
    cache.prefetch(&other).await;

    assert_eq!(cache.invalidate_family("geo"), 3);
    assert!(cache.peek(&Fingerprint::new("geo").with("q", "par")).unwrap().is_stale);
    assert!(!cache.peek(other.fingerprint()).unwrap().is_stale);
}

#[tokio::test(start_paused = true)]
async fn test_config_change_supersedes_the_fetch_in_flight() {
    let cache = RequestCache::new("test");
    let fingerprint = Fingerprint::new("weather");
    let slow = QueryOptions::new(fingerprint.clone(), |_cancel: CancellationToken| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok::<_, FetchError>(1)
    })
    .with_config(five_minutes());
    let fast = QueryOptions::new(fingerprint.clone(), |_cancel: CancellationToken| async {
        Ok::<_, FetchError>(2)
    })
    .with_config(five_minutes().with_stale_time(Duration::from_secs(60)));

    let mut subscription = cache.subscribe(&slow);
    cache.get(&fast);

    let mut seen = Vec::new();
    while let Some(snapshot) = subscription.recv().await {
        let done = snapshot.is_success();
        seen.push((snapshot.status, snapshot.data));
        if done {
            break;
        }
    }
    // the superseded fetch ends before the next one starts
    assert_eq!(
        seen,
        vec![
            (FetchStatus::Fetching, None),
            (FetchStatus::Idle, None),
            (FetchStatus::Fetching, None),
            (FetchStatus::Success, Some(2)),
        ]
    );

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(cache.peek(&fingerprint).unwrap().data, Some(2));

    #[cfg(feature = "stats")]
    assert_eq!(cache.stats().cancellations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_set_data_counts_as_a_fresh_fetch() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::new(Fingerprint::new("ip"), counting(&calls, Duration::ZERO))
        .with_config(five_minutes());

    assert!(cache.peek(options.fingerprint()).is_none());
    cache.set_data(&options, 42);

    let snapshot = cache.get(&options);
    assert_eq!(snapshot.data, Some(42));
    assert_eq!(snapshot.status, FetchStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    #[cfg(feature = "stats")]
    assert_eq!(cache.stats().hits(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remove_closes_subscriptions() {
    let cache = RequestCache::new("test");
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::new(Fingerprint::new("weather"), counting(&calls, Duration::ZERO))
        .with_config(five_minutes());

    let mut subscription = cache.subscribe(&options);
    subscription.wait_for(|s| s.is_success()).await.unwrap();

    assert!(cache.remove(options.fingerprint()));
    assert!(subscription.recv().await.is_none());
    assert!(!cache.remove(options.fingerprint()));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_cache_cancels_outstanding_fetches() {
    let cache = RequestCache::new("render");
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let options = QueryOptions::new(Fingerprint::new("weather"), move |_cancel: CancellationToken| {
        let flag = Arc::clone(&flag);
        async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, FetchError>(1)
        }
    });

    cache.get(&options);
    tokio::task::yield_now().await;
    drop(cache);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!finished.load(Ordering::SeqCst));
}
