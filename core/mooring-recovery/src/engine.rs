//! The recovery engine: a strategy registry plus a single-flight drain loop
//! over captured errors.

use crate::record::{ErrorCategory, ErrorRecord, Severity};
use crate::strategy::{AwaitConnectivity, PurgeCache, RecoveryStrategy};
use mooring_storage::LocalStore;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

const DEFAULT_HISTORY_LIMIT: usize = 100;
const OUTCOME_CHANNEL_CAPACITY: usize = 64;

/// Result of walking the strategies for one captured error.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    /// The error that was processed.
    pub record: ErrorRecord,
    /// Name of the strategy that succeeded, if any.
    pub recovered_by: Option<String>,
    /// Number of strategies tried.
    pub attempts: usize,
}

impl RecoveryOutcome {
    /// Whether some strategy reported success.
    #[must_use]
    pub fn recovered(&self) -> bool {
        self.recovered_by.is_some()
    }
}

/// Counters over everything the engine has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    pub captured: u64,
    pub recovered: u64,
    pub unrecovered: u64,
    pub by_category: HashMap<ErrorCategory, u64>,
}

type StrategyMap = HashMap<ErrorCategory, Vec<Arc<dyn RecoveryStrategy>>>;

struct Inner {
    strategies: RwLock<StrategyMap>,
    queue: Mutex<VecDeque<ErrorRecord>>,
    processing: AtomicBool,
    history: Mutex<VecDeque<ErrorRecord>>,
    history_limit: usize,
    stats: Mutex<RecoveryStats>,
    outcomes: broadcast::Sender<RecoveryOutcome>,
}

/// Registry of recovery strategies with a FIFO of captured errors.
///
/// Cheap to clone; clones share state. Errors are processed strictly one at
/// a time: [`RecoveryEngine::capture_error`] only enqueues and kicks a drain
/// if none is running.
#[derive(Clone)]
pub struct RecoveryEngine {
    inner: Arc<Inner>,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryEngine {
    /// Creates an engine with no strategies registered.
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Creates an engine that remembers at most `limit` captured errors.
    pub fn with_history_limit(limit: usize) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                strategies: RwLock::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                processing: AtomicBool::new(false),
                history: Mutex::new(VecDeque::new()),
                history_limit: limit,
                stats: Mutex::new(RecoveryStats::default()),
                outcomes,
            }),
        }
    }

    /// Registers the built-in strategies: wait for connectivity on network
    /// errors, purge the cache on storage errors.
    pub fn register_defaults(
        &self,
        online: watch::Receiver<bool>,
        connectivity_timeout: Duration,
        store: Arc<dyn LocalStore>,
    ) {
        self.register(
            ErrorCategory::Network,
            Arc::new(AwaitConnectivity::new(online, connectivity_timeout)),
        );
        self.register(ErrorCategory::Storage, Arc::new(PurgeCache::new(store)));
    }

    /// Appends a strategy to a category. Strategies run in registration order.
    pub fn register(&self, category: ErrorCategory, strategy: Arc<dyn RecoveryStrategy>) {
        debug!("Registering recovery strategy {} for {}", strategy.name(), category);
        self.inner
            .strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(category)
            .or_default()
            .push(strategy);
    }

    /// Names of the strategies registered for a category, in order.
    pub fn strategy_names(&self, category: ErrorCategory) -> Vec<String> {
        self.inner
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .map(|list| list.iter().map(|s| s.name().to_string()).collect())
            .unwrap_or_default()
    }

    /// Records an error and schedules recovery.
    ///
    /// Outside a tokio runtime the error stays queued until the next call to
    /// [`RecoveryEngine::process_queue`].
    pub fn capture_error(&self, record: ErrorRecord) {
        match record.severity {
            Severity::Critical | Severity::High => {
                error!("[{}] {}", record.category, record.message)
            }
            Severity::Medium => warn!("[{}] {}", record.category, record.message),
            Severity::Low => info!("[{}] {}", record.category, record.message),
        }

        {
            let mut stats = lock(&self.inner.stats);
            stats.captured += 1;
            *stats.by_category.entry(record.category).or_default() += 1;
        }
        {
            let mut history = lock(&self.inner.history);
            history.push_back(record.clone());
            while history.len() > self.inner.history_limit {
                history.pop_front();
            }
        }
        lock(&self.inner.queue).push_back(record);

        if self.inner.processing.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let engine = self.clone();
            handle.spawn(async move {
                engine.process_queue().await;
            });
        }
    }

    /// Drains the queue. Returns the number of errors processed by this call;
    /// returns 0 immediately if another drain is already running.
    pub async fn process_queue(&self) -> usize {
        let mut processed = 0;
        loop {
            if self
                .inner
                .processing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return processed;
            }

            {
                // Also cleared on unwind and when the drain future is dropped.
                let _draining = DrainFlag(&self.inner.processing);
                loop {
                    let next = lock(&self.inner.queue).pop_front();
                    let Some(record) = next else { break };
                    self.recover(record).await;
                    processed += 1;
                }
            }

            // An error captured between the last pop and the flag reset would
            // otherwise wait for the next capture.
            if lock(&self.inner.queue).is_empty() {
                return processed;
            }
        }
    }

    async fn recover(&self, record: ErrorRecord) {
        let strategies: Vec<Arc<dyn RecoveryStrategy>> = self
            .inner
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&record.category)
            .cloned()
            .unwrap_or_default();

        let mut recovered_by = None;
        let mut attempts = 0;
        for strategy in &strategies {
            attempts += 1;
            debug!("Trying recovery strategy {} for {}", strategy.name(), record.id);
            if strategy.attempt(&record).await {
                info!("Recovered {} error via {}", record.category, strategy.name());
                recovered_by = Some(strategy.name().to_string());
                break;
            }
        }

        {
            let mut stats = lock(&self.inner.stats);
            if recovered_by.is_some() {
                stats.recovered += 1;
            } else {
                stats.unrecovered += 1;
            }
        }

        let _ = self.inner.outcomes.send(RecoveryOutcome {
            record,
            recovered_by,
            attempts,
        });
    }

    /// Subscribes to recovery outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryOutcome> {
        self.inner.outcomes.subscribe()
    }

    /// Errors waiting to be processed.
    pub fn pending(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Whether a drain is running.
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    /// The most recent captured errors, oldest first.
    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        let history = lock(&self.inner.history);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Forgets the error history. Statistics are kept.
    pub fn clear_history(&self) {
        lock(&self.inner.history).clear();
    }

    /// A snapshot of the counters.
    pub fn stats(&self) -> RecoveryStats {
        lock(&self.inner.stats).clone()
    }
}

/// Releases the single-flight drain flag when dropped.
struct DrainFlag<'a>(&'a AtomicBool);

impl Drop for DrainFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
