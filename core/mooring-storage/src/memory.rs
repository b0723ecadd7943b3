//! In-process local store.

use crate::{LocalStore, StorageError, StorageResult, record_id_for};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mooring_types::{ActionId, ActionPatch, CachedRecord, PendingAction, Record, RecordId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    cache: HashMap<String, Vec<CachedRecord>>,
    actions: Vec<PendingAction>,
    next_seq: u64,
}

/// A local store that lives in memory.
///
/// Clones share the same state, so a clone handed to a fresh collection
/// handle behaves like reopening the same database. Writes can be made to
/// fail on demand to exercise storage error paths.
#[derive(Clone, Default)]
pub struct MemoryLocalStore {
    state: Arc<RwLock<MemoryState>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every write fails with [`StorageError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get_cached(
        &self,
        collection: &str,
        id: &RecordId,
    ) -> StorageResult<Option<CachedRecord>> {
        let state = self.state.read().await;
        Ok(state
            .cache
            .get(collection)
            .and_then(|entries| entries.iter().find(|e| e.id().as_ref() == Some(id)))
            .cloned())
    }

    async fn list_cached(&self, collection: &str) -> StorageResult<Vec<CachedRecord>> {
        let state = self.state.read().await;
        Ok(state.cache.get(collection).cloned().unwrap_or_default())
    }

    async fn set_cached(
        &self,
        collection: &str,
        record: &Record,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        self.check_writable()?;
        let id = record_id_for(collection, record)?;
        let entry = CachedRecord::new(collection, record.clone(), expires_at);

        let mut state = self.state.write().await;
        let entries = state.cache.entry(collection.to_string()).or_default();
        match entries.iter_mut().find(|e| e.id().as_ref() == Some(&id)) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    async fn delete_cached(&self, collection: &str, id: &RecordId) -> StorageResult<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if let Some(entries) = state.cache.get_mut(collection) {
            entries.retain(|e| e.id().as_ref() != Some(id));
        }
        Ok(())
    }

    async fn purge_cached(
        &self,
        collection: Option<&str>,
        expired_only: bool,
    ) -> StorageResult<usize> {
        self.check_writable()?;
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut removed = 0;
        for (name, entries) in state.cache.iter_mut() {
            if collection.is_some_and(|c| c != name.as_str()) {
                continue;
            }
            let before = entries.len();
            entries.retain(|e| expired_only && !e.is_expired_at(now));
            removed += before - entries.len();
        }
        Ok(removed)
    }

    async fn append_pending_action(&self, action: PendingAction) -> StorageResult<PendingAction> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state.next_seq += 1;
        let mut stored = action;
        stored.seq = state.next_seq;
        state.actions.push(stored.clone());
        Ok(stored)
    }

    async fn get_pending_action(&self, id: &ActionId) -> StorageResult<Option<PendingAction>> {
        let state = self.state.read().await;
        Ok(state.actions.iter().find(|a| a.id == *id).cloned())
    }

    async fn list_pending_actions(&self, synced: bool) -> StorageResult<Vec<PendingAction>> {
        let state = self.state.read().await;
        let mut result: Vec<PendingAction> = state
            .actions
            .iter()
            .filter(|a| a.synced == synced)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.queue_order(b));
        Ok(result)
    }

    async fn update_pending_action(
        &self,
        id: &ActionId,
        patch: &ActionPatch,
    ) -> StorageResult<PendingAction> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let action = state
            .actions
            .iter_mut()
            .find(|a| a.id == *id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        patch.apply(action);
        Ok(action.clone())
    }

    async fn delete_synced_actions(&self) -> StorageResult<usize> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let before = state.actions.len();
        state.actions.retain(|a| !a.synced || a.abandoned);
        Ok(before - state.actions.len())
    }
}
