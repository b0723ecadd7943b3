//! Durable local store for Mooring.
//!
//! The local store keeps two kinds of state, both keyed by collection name:
//!
//! - **Cached records**: write-through snapshots of remote records, read back
//!   when the application is offline.
//! - **Pending actions**: the ordered queue of mutations awaiting remote
//!   acknowledgement.
//!
//! [`LocalStore`] is the seam the sync layer depends on. Two implementations
//! ship with the crate: [`SqliteLocalStore`], which survives restarts, and
//! [`MemoryLocalStore`], which does not and is meant for tests and ephemeral
//! sessions.

mod error;
mod memory;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryLocalStore;
pub use sqlite::SqliteLocalStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mooring_types::{ActionId, ActionPatch, CachedRecord, PendingAction, Record, RecordId};

/// Durable local key/value and queue store.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Returns the cached snapshot of one record.
    async fn get_cached(
        &self,
        collection: &str,
        id: &RecordId,
    ) -> StorageResult<Option<CachedRecord>>;

    /// Returns every cached snapshot of a collection in first-write order.
    async fn list_cached(&self, collection: &str) -> StorageResult<Vec<CachedRecord>>;

    /// Writes (or supersedes) the snapshot of a record. The record must carry
    /// an `id`.
    async fn set_cached(
        &self,
        collection: &str,
        record: &Record,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;

    /// Removes a cached snapshot. Missing entries are not an error.
    async fn delete_cached(&self, collection: &str, id: &RecordId) -> StorageResult<()>;

    /// Removes cached snapshots, optionally restricted to one collection and
    /// to expired entries. Returns the number removed.
    async fn purge_cached(&self, collection: Option<&str>, expired_only: bool)
    -> StorageResult<usize>;

    /// Appends an action to the queue. The returned copy carries the
    /// store-assigned sequence number.
    async fn append_pending_action(&self, action: PendingAction) -> StorageResult<PendingAction>;

    /// Looks up one action.
    async fn get_pending_action(&self, id: &ActionId) -> StorageResult<Option<PendingAction>>;

    /// Lists actions with the given `synced` flag, in replay order.
    async fn list_pending_actions(&self, synced: bool) -> StorageResult<Vec<PendingAction>>;

    /// Applies a patch and returns the resulting action.
    async fn update_pending_action(
        &self,
        id: &ActionId,
        patch: &ActionPatch,
    ) -> StorageResult<PendingAction>;

    /// Deletes synced actions that were delivered (dead letters are kept).
    /// Returns the number removed.
    async fn delete_synced_actions(&self) -> StorageResult<usize>;
}

pub(crate) fn record_id_for(collection: &str, record: &Record) -> StorageResult<RecordId> {
    record.id().ok_or_else(|| StorageError::MissingRecordId {
        collection: collection.to_string(),
    })
}
