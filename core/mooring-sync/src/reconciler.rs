//! The sync reconciler: replays queued actions against the remote store.
//!
//! A pass takes a snapshot of the unsynced actions in replay order and
//! dispatches each one under the replay retry policy. Passes never overlap;
//! a pass requested while another is running returns an empty summary.
//!
//! When an action fails, later actions on the same record are deferred to
//! the next pass so the remote never sees an update before the create it
//! depends on. Actions on other records keep draining.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::queue::PendingActionQueue;
use crate::remote::RemoteStore;
use chrono::{DateTime, Utc};
use mooring_recovery::{ErrorRecord, RecoveryEngine, with_retry_if};
use mooring_storage::LocalStore;
use mooring_types::{ActionId, ActionKind, PendingAction, Record, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Actions the remote accepted.
    pub success: usize,
    /// Actions that failed this pass (including those abandoned).
    pub failed: usize,
    /// Unsynced actions at the start of the pass.
    pub total: usize,
    /// Actions skipped because an earlier action on the same record failed.
    pub deferred: usize,
    /// Actions abandoned this pass.
    pub abandoned: usize,
    /// Ids of the actions abandoned this pass.
    #[serde(default)]
    pub abandoned_ids: Vec<ActionId>,
}

impl SyncSummary {
    /// Whether the pass touched nothing.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// A completed pass and when it finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub summary: SyncSummary,
    pub finished_at: DateTime<Utc>,
}

type RecordKey = (String, RecordId);

/// Drains the pending-action queue.
pub struct Reconciler {
    queue: PendingActionQueue,
    remote: Arc<dyn RemoteStore>,
    monitor: ConnectivityMonitor,
    config: SyncConfig,
    recovery: Option<RecoveryEngine>,
    pass_lock: tokio::sync::Mutex<()>,
    syncing: AtomicBool,
    last_pass: Mutex<Option<PassReport>>,
}

/// Clears the syncing flag when a pass ends, including when its future is
/// dropped mid-pass.
struct SyncingFlag<'a>(&'a AtomicBool);

impl<'a> SyncingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SyncingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        monitor: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue: PendingActionQueue::new(store),
            remote,
            monitor,
            config,
            recovery: None,
            pass_lock: tokio::sync::Mutex::new(()),
            syncing: AtomicBool::new(false),
            last_pass: Mutex::new(None),
        }
    }

    /// Reports replay failures to a recovery engine.
    #[must_use]
    pub fn with_recovery(mut self, engine: RecoveryEngine) -> Self {
        self.recovery = Some(engine);
        self
    }

    pub fn queue(&self) -> &PendingActionQueue {
        &self.queue
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The last pass that actually ran.
    pub fn last_pass(&self) -> Option<PassReport> {
        self.last_pass
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a pass is in flight.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Runs one pass.
    ///
    /// Returns an empty summary without contacting the remote when offline
    /// or when another pass is running. Replay failures are absorbed into the
    /// summary; only local store failures are returned as errors.
    pub async fn sync(&self) -> SyncResult<SyncSummary> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            debug!("Sync pass already running, skipping");
            return Ok(SyncSummary::default());
        };
        if !self.monitor.is_online() {
            debug!("Offline, skipping sync pass");
            return Ok(SyncSummary::default());
        }
        let _syncing = SyncingFlag::raise(&self.syncing);

        let actions = self.queue.list_unsynced(None).await?;
        let mut summary = SyncSummary {
            total: actions.len(),
            ..Default::default()
        };
        if actions.is_empty() {
            self.record_pass(&summary);
            return Ok(summary);
        }
        info!("Replaying {} pending actions", actions.len());

        let mut blocked: HashSet<RecordKey> = HashSet::new();
        let mut renamed: HashMap<RecordKey, RecordId> = HashMap::new();

        for mut action in actions {
            let mut key = action.record_id().map(|id| (action.collection.clone(), id));

            // Creates earlier in this pass may have replaced a temporary id.
            if let Some(new_id) = key.as_ref().and_then(|k| renamed.get(k)).cloned() {
                action.payload.set_id(&new_id);
                key = Some((action.collection.clone(), new_id));
            }

            if key.as_ref().is_some_and(|k| blocked.contains(k)) {
                debug!("Deferring action {} behind a failed action", action.id);
                summary.deferred += 1;
                continue;
            }

            match self.replay(&action).await {
                Ok(result) => {
                    self.queue.mark_synced(&action.id).await?;
                    summary.success += 1;
                    self.after_success(&action, result, &mut renamed).await?;
                }
                Err(e) => {
                    summary.failed += 1;
                    let message = e.to_string();
                    let count = self.queue.increment_retry(&action.id, Some(&message)).await?;
                    debug!(
                        "Replay of {} {} failed (attempt {}): {}",
                        action.kind, action.id, count, message
                    );

                    if let Some(engine) = &self.recovery {
                        engine.capture_error(
                            ErrorRecord::from_error(&e)
                                .with_context("collection", &action.collection)
                                .with_context("action", action.id),
                        );
                    }

                    if count >= self.config.max_retry_count {
                        self.queue.abandon(&action.id, &message).await?;
                        summary.abandoned += 1;
                        summary.abandoned_ids.push(action.id);
                    } else if let Some(k) = key {
                        blocked.insert(k);
                    }
                }
            }
        }

        info!(
            "Sync pass complete: {} ok, {} failed, {} deferred, {} abandoned",
            summary.success, summary.failed, summary.deferred, summary.abandoned
        );
        self.record_pass(&summary);
        Ok(summary)
    }

    fn record_pass(&self, summary: &SyncSummary) {
        *self
            .last_pass
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(PassReport {
            summary: summary.clone(),
            finished_at: Utc::now(),
        });
    }

    async fn replay(&self, action: &PendingAction) -> SyncResult<Option<Record>> {
        with_retry_if(
            || self.dispatch(action),
            &self.config.replay_policy,
            SyncError::is_retryable,
        )
        .await
    }

    async fn dispatch(&self, action: &PendingAction) -> SyncResult<Option<Record>> {
        let collection = action.collection.as_str();
        match action.kind {
            ActionKind::Create => self
                .remote
                .insert(collection, &action.payload)
                .await
                .map(Some),
            ActionKind::Update => {
                let id = require_id(action)?;
                self.remote
                    .update(collection, &id, &action.payload.without_id())
                    .await
                    .map(Some)
            }
            ActionKind::Delete => {
                let id = require_id(action)?;
                self.remote.delete(collection, &id).await.map(|()| None)
            }
        }
    }

    async fn after_success(
        &self,
        action: &PendingAction,
        result: Option<Record>,
        renamed: &mut HashMap<RecordKey, RecordId>,
    ) -> SyncResult<()> {
        let collection = action.collection.as_str();
        let store = self.queue.store();

        let Some(record) = result else {
            if let Some(id) = action.record_id() {
                if let Err(e) = store.delete_cached(collection, &id).await {
                    warn!("Failed to drop cached {}/{}: {}", collection, id, e);
                }
            }
            return Ok(());
        };

        if action.kind == ActionKind::Create {
            if let (Some(local_id), Some(server_id)) = (action.record_id(), record.id()) {
                if local_id != server_id {
                    info!("{}: {} is now {}", collection, local_id, server_id);
                    self.queue.retarget(collection, &local_id, &server_id).await?;
                    renamed.insert((collection.to_string(), local_id.clone()), server_id);
                    if let Err(e) = store.delete_cached(collection, &local_id).await {
                        warn!("Failed to drop cached {}/{}: {}", collection, local_id, e);
                    }
                }
            }
        }

        let expires_at = self.config.cache_ttl().map(|ttl| Utc::now() + ttl);
        if let Err(e) = store.set_cached(collection, &record, expires_at).await {
            warn!("Failed to cache synced record in {}: {}", collection, e);
        }
        Ok(())
    }
}

fn require_id(action: &PendingAction) -> SyncResult<RecordId> {
    action.record_id().ok_or_else(|| {
        SyncError::Validation(format!("{} action {} has no record id", action.kind, action.id))
    })
}
