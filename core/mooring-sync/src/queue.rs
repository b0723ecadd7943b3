//! The pending-action queue: a durable, ordered log of mutations not yet
//! acknowledged by the remote store.

use crate::error::SyncResult;
use mooring_storage::LocalStore;
use mooring_types::{ActionId, ActionKind, ActionPatch, PendingAction, Record, RecordId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Queue operations over a [`LocalStore`]. Cheap to clone.
#[derive(Clone)]
pub struct PendingActionQueue {
    store: Arc<dyn LocalStore>,
}

impl PendingActionQueue {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Appends an unsynced action and returns its id.
    pub async fn enqueue(
        &self,
        kind: ActionKind,
        collection: &str,
        payload: Record,
    ) -> SyncResult<ActionId> {
        let action = PendingAction::new(kind, collection, payload);
        let stored = self.store.append_pending_action(action).await?;
        debug!(
            "Queued {} on {} (action {}, seq {})",
            stored.kind, stored.collection, stored.id, stored.seq
        );
        Ok(stored.id)
    }

    /// Looks up one action.
    pub async fn get(&self, id: &ActionId) -> SyncResult<Option<PendingAction>> {
        Ok(self.store.get_pending_action(id).await?)
    }

    /// Unsynced actions in replay order, optionally for one collection.
    pub async fn list_unsynced(&self, collection: Option<&str>) -> SyncResult<Vec<PendingAction>> {
        let mut actions = self.store.list_pending_actions(false).await?;
        if let Some(name) = collection {
            actions.retain(|a| a.collection == name);
        }
        actions.sort_by(PendingAction::queue_order);
        Ok(actions)
    }

    /// Number of unsynced actions.
    pub async fn pending_count(&self, collection: Option<&str>) -> SyncResult<usize> {
        Ok(self.list_unsynced(collection).await?.len())
    }

    /// Marks an action delivered. Calling it again is a no-op.
    pub async fn mark_synced(&self, id: &ActionId) -> SyncResult<()> {
        self.store
            .update_pending_action(id, &ActionPatch::synced())
            .await?;
        Ok(())
    }

    /// Counts one more failed replay and returns the new count. Synced
    /// actions are left untouched.
    pub async fn increment_retry(&self, id: &ActionId, error: Option<&str>) -> SyncResult<u32> {
        let Some(current) = self.store.get_pending_action(id).await? else {
            return Err(mooring_storage::StorageError::NotFound(id.to_string()).into());
        };
        if current.synced {
            return Ok(current.retry_count);
        }

        let mut patch = ActionPatch::default().retry_count(current.retry_count.saturating_add(1));
        if let Some(message) = error {
            patch = patch.last_error(message);
        }
        let updated = self.store.update_pending_action(id, &patch).await?;
        Ok(updated.retry_count)
    }

    /// Gives up on an action: it is marked synced and kept as a dead letter.
    pub async fn abandon(&self, id: &ActionId, reason: &str) -> SyncResult<PendingAction> {
        let patch = ActionPatch::default().abandoned().last_error(reason);
        let action = self.store.update_pending_action(id, &patch).await?;
        warn!(
            "Abandoned {} on {} after {} retries: {}",
            action.kind, action.collection, action.retry_count, reason
        );
        Ok(action)
    }

    /// Abandoned actions, oldest first.
    pub async fn dead_letters(&self, collection: Option<&str>) -> SyncResult<Vec<PendingAction>> {
        let mut actions: Vec<PendingAction> = self
            .store
            .list_pending_actions(true)
            .await?
            .into_iter()
            .filter(|a| a.abandoned && collection.is_none_or(|c| a.collection == c))
            .collect();
        actions.sort_by(PendingAction::queue_order);
        Ok(actions)
    }

    /// Points unsynced actions at `to` instead of `from`. Returns the number
    /// of actions rewritten.
    pub async fn retarget(
        &self,
        collection: &str,
        from: &RecordId,
        to: &RecordId,
    ) -> SyncResult<usize> {
        let mut rewritten = 0;
        for action in self.list_unsynced(Some(collection)).await? {
            if action.record_id().as_ref() != Some(from) {
                continue;
            }
            let payload = action.payload.clone().with_id(to);
            self.store
                .update_pending_action(&action.id, &ActionPatch::default().payload(payload))
                .await?;
            rewritten += 1;
        }
        if rewritten > 0 {
            debug!("Retargeted {} actions on {} from {} to {}", rewritten, collection, from, to);
        }
        Ok(rewritten)
    }

    /// Deletes delivered actions. Dead letters are kept.
    pub async fn purge_synced(&self) -> SyncResult<usize> {
        Ok(self.store.delete_synced_actions().await?)
    }
}
