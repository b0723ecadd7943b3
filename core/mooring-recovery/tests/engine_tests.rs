use chrono::{Duration as ChronoDuration, Utc};
use mooring_recovery::{
    AwaitConnectivity, Classify, ErrorCategory, ErrorRecord, FnStrategy, PurgeCache,
    RecoveryEngine, RecoveryStrategy, Severity,
};
use mooring_storage::{LocalStore, MemoryLocalStore};
use mooring_types::Record;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

fn counting(name: &str, counter: Arc<AtomicUsize>, result: bool) -> Arc<dyn RecoveryStrategy> {
    Arc::new(FnStrategy::new(name, move |_record| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            result
        }
    }))
}

// ── Classification ───────────────────────────────────────────────

#[test]
fn messages_are_classified_by_keyword() {
    let cases = [
        ("HTTP 401 Unauthorized", ErrorCategory::Authentication),
        ("permission denied for table notes", ErrorCategory::Authorization),
        ("validation failed: title is required", ErrorCategory::Validation),
        ("connection reset by peer", ErrorCategory::Network),
        ("request timed out", ErrorCategory::Network),
        ("sqlite: database is locked", ErrorCategory::Storage),
        ("503 Service Unavailable", ErrorCategory::Api),
        ("something odd happened", ErrorCategory::Unknown),
    ];
    for (message, expected) in cases {
        assert_eq!(ErrorCategory::from_message(message), expected, "{message}");
    }
}

#[derive(Debug)]
struct DiskFull;

impl fmt::Display for DiskFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("disk full")
    }
}

impl Classify for DiskFull {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[test]
fn classified_errors_carry_their_own_category() {
    let record = ErrorRecord::from_error(&DiskFull).with_context("collection", "notes");
    assert_eq!(record.category, ErrorCategory::Storage);
    assert_eq!(record.severity, Severity::Critical);
    assert_eq!(record.message, "disk full");
    assert_eq!(record.context("collection"), Some("notes"));
}

#[test]
fn default_severity_follows_category() {
    assert_eq!(ErrorRecord::new(ErrorCategory::Validation, "x").severity, Severity::Low);
    assert_eq!(ErrorRecord::new(ErrorCategory::Storage, "x").severity, Severity::High);
    assert_eq!(ErrorRecord::new(ErrorCategory::Network, "x").severity, Severity::Medium);
}

// ── Strategy walk ────────────────────────────────────────────────

#[tokio::test]
async fn strategies_run_in_order_until_one_succeeds() {
    let engine = RecoveryEngine::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let third = Arc::new(AtomicUsize::new(0));
    engine.register(ErrorCategory::Api, counting("first", first.clone(), false));
    engine.register(ErrorCategory::Api, counting("second", second.clone(), true));
    engine.register(ErrorCategory::Api, counting("third", third.clone(), true));
    assert_eq!(engine.strategy_names(ErrorCategory::Api), vec!["first", "second", "third"]);

    let mut outcomes = engine.subscribe();
    engine.capture_error(ErrorRecord::new(ErrorCategory::Api, "502 bad gateway"));

    let outcome = outcomes.recv().await.unwrap();
    assert_eq!(outcome.recovered_by.as_deref(), Some("second"));
    assert_eq!(outcome.attempts, 2);
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(third.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unregistered_category_is_unrecovered() {
    let engine = RecoveryEngine::new();
    let mut outcomes = engine.subscribe();
    engine.capture_error(ErrorRecord::new(ErrorCategory::Validation, "bad input"));

    let outcome = outcomes.recv().await.unwrap();
    assert!(!outcome.recovered());
    assert_eq!(outcome.attempts, 0);

    let stats = engine.stats();
    assert_eq!(stats.captured, 1);
    assert_eq!(stats.unrecovered, 1);
    assert_eq!(stats.recovered, 0);
}

// ── Queue ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn errors_are_processed_one_at_a_time_in_capture_order() {
    let engine = RecoveryEngine::new();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    {
        let running = running.clone();
        let peak = peak.clone();
        let seen = seen.clone();
        engine.register(
            ErrorCategory::Network,
            Arc::new(FnStrategy::new("slow", move |record: ErrorRecord| {
                let running = running.clone();
                let peak = peak.clone();
                let seen = seen.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    seen.lock().unwrap().push(record.message);
                    running.fetch_sub(1, Ordering::SeqCst);
                    true
                }
            })),
        );
    }

    let mut outcomes = engine.subscribe();
    for n in 0..3 {
        engine.capture_error(ErrorRecord::new(ErrorCategory::Network, format!("offline {n}")));
    }
    for _ in 0..3 {
        assert!(outcomes.recv().await.unwrap().recovered());
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["offline 0", "offline 1", "offline 2"]
    );
    assert_eq!(engine.pending(), 0);
    assert!(!engine.is_processing());
}

#[test]
fn capture_outside_runtime_waits_for_explicit_drain() {
    let engine = RecoveryEngine::new();
    engine.capture_error(ErrorRecord::new(ErrorCategory::Unknown, "first"));
    engine.capture_error(ErrorRecord::new(ErrorCategory::Unknown, "second"));
    assert_eq!(engine.pending(), 2);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let processed = runtime.block_on(engine.process_queue());
    assert_eq!(processed, 2);
    assert_eq!(engine.pending(), 0);
}

fn current_thread() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

#[test]
fn panicking_strategy_does_not_wedge_the_drain() {
    let engine = RecoveryEngine::new();
    engine.register(
        ErrorCategory::Api,
        Arc::new(FnStrategy::new("broken", |_record| -> std::future::Ready<bool> {
            panic!("strategy bug")
        })),
    );
    let network_hits = Arc::new(AtomicUsize::new(0));
    engine.register(
        ErrorCategory::Network,
        counting("network", network_hits.clone(), true),
    );
    engine.capture_error(ErrorRecord::new(ErrorCategory::Api, "boom"));

    let runtime = current_thread();
    let engine_in_task = engine.clone();
    let drain = runtime.block_on(async move {
        tokio::spawn(async move { engine_in_task.process_queue().await }).await
    });
    assert!(drain.unwrap_err().is_panic());
    assert!(!engine.is_processing());

    engine.capture_error(ErrorRecord::new(ErrorCategory::Network, "offline"));
    assert_eq!(runtime.block_on(engine.process_queue()), 1);
    assert_eq!(network_hits.load(Ordering::SeqCst), 1);
    assert_eq!(engine.pending(), 0);
}

#[test]
fn cancelled_drain_releases_the_flag() {
    let engine = RecoveryEngine::new();
    engine.register(
        ErrorCategory::Api,
        Arc::new(FnStrategy::new("stuck", |_record| std::future::pending::<bool>())),
    );
    let network_hits = Arc::new(AtomicUsize::new(0));
    engine.register(
        ErrorCategory::Network,
        counting("network", network_hits.clone(), true),
    );
    engine.capture_error(ErrorRecord::new(ErrorCategory::Api, "hangs"));

    let runtime = current_thread();
    let timed_out = runtime.block_on(async {
        tokio::time::timeout(Duration::from_millis(50), engine.process_queue()).await
    });
    assert!(timed_out.is_err());
    assert!(!engine.is_processing());

    engine.capture_error(ErrorRecord::new(ErrorCategory::Network, "offline"));
    assert_eq!(runtime.block_on(engine.process_queue()), 1);
    assert_eq!(network_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn history_is_bounded_and_stats_survive_clearing() {
    let engine = RecoveryEngine::with_history_limit(2);
    engine.capture_error(ErrorRecord::new(ErrorCategory::Network, "a"));
    engine.capture_error(ErrorRecord::new(ErrorCategory::Storage, "b"));
    engine.capture_error(ErrorRecord::new(ErrorCategory::Network, "c"));

    let recent: Vec<String> = engine.recent_errors(10).into_iter().map(|r| r.message).collect();
    assert_eq!(recent, vec!["b", "c"]);
    let latest: Vec<String> = engine.recent_errors(1).into_iter().map(|r| r.message).collect();
    assert_eq!(latest, vec!["c"]);

    engine.clear_history();
    assert!(engine.recent_errors(10).is_empty());

    let stats = engine.stats();
    assert_eq!(stats.captured, 3);
    assert_eq!(stats.by_category.get(&ErrorCategory::Network), Some(&2));
    assert_eq!(stats.by_category.get(&ErrorCategory::Storage), Some(&1));
}

#[test]
fn clones_share_registry_and_queue() {
    let engine = RecoveryEngine::new();
    let clone = engine.clone();
    clone.register(
        ErrorCategory::Api,
        counting("shared", Arc::new(AtomicUsize::new(0)), true),
    );
    clone.capture_error(ErrorRecord::new(ErrorCategory::Api, "x"));
    assert_eq!(engine.strategy_names(ErrorCategory::Api), vec!["shared"]);
    assert_eq!(engine.pending(), 1);
}

// ── Built-in strategies ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn await_connectivity_succeeds_when_signal_flips() {
    let (tx, rx) = watch::channel(false);
    let strategy = AwaitConnectivity::new(rx, Duration::from_secs(5));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = tx.send(true);
        // Keep the sender alive past the flip.
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let record = ErrorRecord::new(ErrorCategory::Network, "offline");
    assert!(strategy.attempt(&record).await);
}

#[tokio::test(start_paused = true)]
async fn await_connectivity_times_out() {
    let (_tx, rx) = watch::channel(false);
    let strategy = AwaitConnectivity::new(rx, Duration::from_millis(100));
    let record = ErrorRecord::new(ErrorCategory::Network, "offline");
    assert!(!strategy.attempt(&record).await);
}

#[tokio::test]
async fn await_connectivity_is_immediate_when_online() {
    let (_tx, rx) = watch::channel(true);
    let strategy = AwaitConnectivity::new(rx, Duration::ZERO);
    assert!(strategy.attempt(&ErrorRecord::new(ErrorCategory::Network, "x")).await);
}

#[tokio::test]
async fn await_connectivity_fails_when_sender_dropped() {
    let (tx, rx) = watch::channel(false);
    drop(tx);
    let strategy = AwaitConnectivity::new(rx, Duration::from_secs(1));
    assert!(!strategy.attempt(&ErrorRecord::new(ErrorCategory::Network, "x")).await);
}

async fn seeded_store() -> MemoryLocalStore {
    let store = MemoryLocalStore::new();
    store
        .set_cached("notes", &Record::new().with("id", "n1").with("title", "a"), None)
        .await
        .unwrap();
    store
        .set_cached(
            "notes",
            &Record::new().with("id", "n2"),
            Some(Utc::now() - ChronoDuration::minutes(5)),
        )
        .await
        .unwrap();
    store
        .set_cached("tasks", &Record::new().with("id", "t1"), None)
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn purge_cache_drops_the_named_collection() {
    let store = seeded_store().await;
    let strategy = PurgeCache::new(Arc::new(store.clone()));
    let record =
        ErrorRecord::new(ErrorCategory::Storage, "corrupt row").with_context("collection", "notes");

    assert!(strategy.attempt(&record).await);
    assert!(store.list_cached("notes").await.unwrap().is_empty());
    assert_eq!(store.list_cached("tasks").await.unwrap().len(), 1);
}

#[tokio::test]
async fn purge_cache_without_collection_only_drops_expired() {
    let store = seeded_store().await;
    let strategy = PurgeCache::new(Arc::new(store.clone()));

    assert!(strategy.attempt(&ErrorRecord::new(ErrorCategory::Storage, "quota")).await);
    let notes = store.list_cached("notes").await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id().unwrap().as_str(), "n1");
    assert_eq!(store.list_cached("tasks").await.unwrap().len(), 1);
}

#[tokio::test]
async fn purge_cache_reports_failure_when_store_rejects_writes() {
    let store = seeded_store().await;
    store.set_fail_writes(true);
    let strategy = PurgeCache::new(Arc::new(store));
    assert!(!strategy.attempt(&ErrorRecord::new(ErrorCategory::Storage, "x")).await);
}

#[tokio::test]
async fn register_defaults_wires_network_and_storage() {
    let engine = RecoveryEngine::new();
    let (_tx, rx) = watch::channel(true);
    let store: Arc<dyn LocalStore> = Arc::new(MemoryLocalStore::new());
    engine.register_defaults(rx, Duration::from_secs(1), store);

    assert_eq!(engine.strategy_names(ErrorCategory::Network), vec!["await-connectivity"]);
    assert_eq!(engine.strategy_names(ErrorCategory::Storage), vec!["purge-cache"]);
    assert!(engine.strategy_names(ErrorCategory::Api).is_empty());

    let mut outcomes = engine.subscribe();
    engine.capture_error(ErrorRecord::new(ErrorCategory::Network, "flaky"));
    let outcome = outcomes.recv().await.unwrap();
    assert_eq!(outcome.recovered_by.as_deref(), Some("await-connectivity"));
}
