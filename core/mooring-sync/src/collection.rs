//! Offline-aware collection handle.
//!
//! An [`OfflineCollection`] is the read/write surface an application binds
//! to. It chooses between the online path (call the remote store, then write
//! the result through to the cache) and the offline path (queue the change
//! for the reconciler, then apply it optimistically to the cache and to
//! memory). A change that cannot be queued is not applied. An online call
//! that fails with a connectivity error takes the offline path instead.
//!
//! State is published through a [`watch`] channel so observers see every
//! transition: `Idle → Loading → Ready`, back to `Loading` on every load, and
//! `Error` on failure with the previous data retained.

use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::queue::PendingActionQueue;
use crate::remote::RemoteStore;
use chrono::Utc;
use mooring_storage::LocalStore;
use mooring_types::{ActionKind, Record, RecordId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Load state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Error,
}

/// What observers see.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionSnapshot {
    pub data: Vec<Record>,
    pub status: LoadStatus,
    pub error: Option<String>,
}

impl CollectionSnapshot {
    pub fn is_loading(&self) -> bool {
        self.status == LoadStatus::Loading
    }
}

/// Read/write handle on one named collection.
pub struct OfflineCollection {
    name: String,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    monitor: ConnectivityMonitor,
    queue: PendingActionQueue,
    cache_ttl: Option<chrono::Duration>,
    state: watch::Sender<CollectionSnapshot>,
}

impl OfflineCollection {
    /// Creates an unloaded handle. Call [`OfflineCollection::load`] to
    /// populate it.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        monitor: ConnectivityMonitor,
    ) -> Self {
        let (state, _) = watch::channel(CollectionSnapshot::default());
        Self {
            name: name.into(),
            queue: PendingActionQueue::new(store.clone()),
            store,
            remote,
            monitor,
            cache_ttl: None,
            state,
        }
    }

    /// Gives cached snapshots a lifetime.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Option<chrono::Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Observed state ───────────────────────────────────────────

    pub fn data(&self) -> Vec<Record> {
        self.state.borrow().data.clone()
    }

    pub fn status(&self) -> LoadStatus {
        self.state.borrow().status
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn snapshot(&self) -> CollectionSnapshot {
        self.state.borrow().clone()
    }

    /// Subscribes to snapshots.
    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot> {
        self.state.subscribe()
    }

    /// Looks up a loaded record.
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.state
            .borrow()
            .data
            .iter()
            .find(|r| r.id().as_ref() == Some(id))
            .cloned()
    }

    // ── Loading ──────────────────────────────────────────────────

    /// Loads the collection: from the remote when online (writing every
    /// record through to the cache), from the cache otherwise.
    pub async fn load(&self) -> SyncResult<()> {
        self.state.send_modify(|s| {
            s.status = LoadStatus::Loading;
            s.error = None;
        });

        if !self.monitor.is_online() {
            let data = self.read_cache().await;
            self.set_ready(data);
            return Ok(());
        }

        match self.remote.select(&self.name).await {
            Ok(records) => {
                let expires_at = self.expires_at();
                for record in &records {
                    if let Err(e) = self.store.set_cached(&self.name, record, expires_at).await {
                        warn!("Failed to cache record in {}: {}", self.name, e);
                    }
                }
                self.set_ready(records);
                Ok(())
            }
            Err(e) if e.is_connectivity() => {
                debug!("Remote unreachable, loading {} from cache: {}", self.name, e);
                let data = self.read_cache().await;
                self.set_ready(data);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load {}: {}", self.name, e);
                let message = e.to_string();
                self.state.send_modify(|s| {
                    s.status = LoadStatus::Error;
                    s.error = Some(message);
                });
                Err(e)
            }
        }
    }

    /// Reloads the collection.
    pub async fn refresh(&self) -> SyncResult<()> {
        self.load().await
    }

    async fn read_cache(&self) -> Vec<Record> {
        match self.store.list_cached(&self.name).await {
            Ok(entries) => entries.into_iter().map(|e| e.record).collect(),
            Err(e) => {
                warn!("Failed to read cache for {}: {}", self.name, e);
                Vec::new()
            }
        }
    }

    fn set_ready(&self, data: Vec<Record>) {
        self.state.send_modify(|s| {
            s.data = data;
            s.status = LoadStatus::Ready;
            s.error = None;
        });
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Creates a record and returns it as it will appear in `data()`.
    ///
    /// Offline, a record without an id gets a temporary `local-` id that the
    /// reconciler swaps for the server id once the create is replayed.
    pub async fn create(&self, record: Record) -> SyncResult<Record> {
        if self.monitor.is_online() {
            match self.remote.insert(&self.name, &record).await {
                Ok(stored) => {
                    self.cache_best_effort(&stored).await;
                    self.upsert_local(stored.clone());
                    return Ok(stored);
                }
                Err(e) if e.is_connectivity() => {
                    debug!("Create on {} fell back to queue: {}", self.name, e);
                }
                Err(e) => return Err(e),
            }
        }

        let record = match record.id() {
            Some(_) => record,
            None => record.with_id(&RecordId::temporary()),
        };
        // The queue is the durable copy; the cache only mirrors it.
        self.queue
            .enqueue(ActionKind::Create, &self.name, record.clone())
            .await?;
        self.cache_best_effort(&record).await;
        self.upsert_local(record.clone());
        Ok(record)
    }

    /// Merges `partial` into a loaded record.
    pub async fn update(&self, id: &RecordId, partial: Record) -> SyncResult<Record> {
        let Some(mut merged) = self.get(id) else {
            return Err(SyncError::not_found(&self.name, id));
        };
        let partial = partial.without_id();
        merged.merge(&partial);

        if self.monitor.is_online() {
            match self.remote.update(&self.name, id, &partial).await {
                Ok(stored) => {
                    self.cache_best_effort(&stored).await;
                    self.upsert_local(stored.clone());
                    return Ok(stored);
                }
                Err(e) if e.is_connectivity() => {
                    debug!("Update on {} fell back to queue: {}", self.name, e);
                }
                Err(e) => return Err(e),
            }
        }

        self.queue
            .enqueue(ActionKind::Update, &self.name, partial.with_id(id))
            .await?;
        self.cache_best_effort(&merged).await;
        self.upsert_local(merged.clone());
        Ok(merged)
    }

    /// Deletes a record. Online, a record the remote refuses to delete is
    /// put back.
    pub async fn delete(&self, id: &RecordId) -> SyncResult<()> {
        if self.monitor.is_online() {
            let removed = self.remove_local(id);
            if let Err(e) = self.store.delete_cached(&self.name, id).await {
                warn!("Failed to drop cached {}/{}: {}", self.name, id, e);
            }

            match self.remote.delete(&self.name, id).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_connectivity() => {
                    debug!("Delete on {} fell back to queue: {}", self.name, e);
                    let queued = self
                        .queue
                        .enqueue(ActionKind::Delete, &self.name, Record::new().with_id(id))
                        .await;
                    if let Err(e) = queued {
                        self.restore(removed).await;
                        return Err(e);
                    }
                    return Ok(());
                }
                Err(e) => {
                    self.restore(removed).await;
                    return Err(e);
                }
            }
        }

        self.queue
            .enqueue(ActionKind::Delete, &self.name, Record::new().with_id(id))
            .await?;
        if let Err(e) = self.store.delete_cached(&self.name, id).await {
            warn!("Failed to drop cached {}/{}: {}", self.name, id, e);
        }
        self.remove_local(id);
        Ok(())
    }

    /// Puts back a record taken out by an online delete that did not go
    /// through.
    async fn restore(&self, removed: Option<(usize, Record)>) {
        if let Some((index, record)) = removed {
            self.cache_best_effort(&record).await;
            self.state.send_modify(|s| {
                let at = index.min(s.data.len());
                s.data.insert(at, record);
            });
        }
    }

    fn expires_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.cache_ttl.map(|ttl| Utc::now() + ttl)
    }

    async fn cache_best_effort(&self, record: &Record) {
        if let Err(e) = self.store.set_cached(&self.name, record, self.expires_at()).await {
            warn!("Failed to cache record in {}: {}", self.name, e);
        }
    }

    fn upsert_local(&self, record: Record) {
        let id = record.id();
        self.state.send_modify(|s| {
            match s.data.iter_mut().find(|r| id.is_some() && r.id() == id) {
                Some(existing) => *existing = record,
                None => s.data.push(record),
            }
        });
    }

    fn remove_local(&self, id: &RecordId) -> Option<(usize, Record)> {
        let mut removed = None;
        self.state.send_if_modified(|s| {
            match s.data.iter().position(|r| r.id().as_ref() == Some(id)) {
                Some(index) => {
                    removed = Some((index, s.data.remove(index)));
                    true
                }
                None => false,
            }
        });
        removed
    }
}
