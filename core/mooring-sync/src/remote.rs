//! Remote record store abstraction.
//!
//! The sync layer never talks to a backend directly; it goes through
//! [`RemoteStore`], so an HTTP service, an embedded database or a test double
//! can sit behind the same collection and reconciler code.

use crate::error::SyncResult;
use async_trait::async_trait;
use mooring_types::{Record, RecordId};

/// A remote store of records grouped into named collections.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns every record of a collection.
    async fn select(&self, collection: &str) -> SyncResult<Vec<Record>>;

    /// Inserts a record and returns it as stored, which may carry a
    /// server-assigned id.
    async fn insert(&self, collection: &str, record: &Record) -> SyncResult<Record>;

    /// Applies a partial update and returns the updated record.
    async fn update(&self, collection: &str, id: &RecordId, partial: &Record)
    -> SyncResult<Record>;

    /// Deletes a record.
    async fn delete(&self, collection: &str, id: &RecordId) -> SyncResult<()>;

    /// Cheap reachability check used by the connectivity probe.
    async fn health(&self) -> SyncResult<()> {
        Ok(())
    }
}

/// An in-memory remote store for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    /// A call observed by [`MockRemoteStore`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RemoteCall {
        Select { collection: String },
        Insert { collection: String, id: Option<RecordId> },
        Update { collection: String, id: RecordId },
        Delete { collection: String, id: RecordId },
        Health,
    }

    /// A failure the mock can be told to produce.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MockFailure {
        Network,
        Api(u16),
        Validation(String),
        Auth,
        Forbidden,
    }

    impl MockFailure {
        fn to_error(&self) -> SyncError {
            match self {
                MockFailure::Network => SyncError::Network("connection refused".into()),
                MockFailure::Api(status) => SyncError::Api {
                    status: *status,
                    message: "injected".into(),
                },
                MockFailure::Validation(msg) => SyncError::Validation(msg.clone()),
                MockFailure::Auth => SyncError::Auth("token expired".into()),
                MockFailure::Forbidden => SyncError::Forbidden("read-only".into()),
            }
        }
    }

    #[derive(Default)]
    struct MockState {
        collections: HashMap<String, Vec<Record>>,
        calls: Vec<RemoteCall>,
        next_failures: VecDeque<MockFailure>,
        failing_records: HashMap<RecordId, MockFailure>,
        unreachable: bool,
        temp_ids_replaced: bool,
        next_server_id: u64,
        rejected_ids: HashSet<RecordId>,
    }

    /// A remote store that keeps records in memory and records every call.
    ///
    /// Clones share state. Failures can be injected globally
    /// ([`MockRemoteStore::set_unreachable`]), for the next calls
    /// ([`MockRemoteStore::fail_next`]) or per record
    /// ([`MockRemoteStore::fail_record`]).
    #[derive(Clone, Default)]
    pub struct MockRemoteStore {
        state: Arc<Mutex<MockState>>,
    }

    impl MockRemoteStore {
        /// Creates an empty remote.
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates a remote that replaces temporary ids on insert with
        /// server-assigned ones (`srv-1`, `srv-2`, ...).
        pub fn assigning_ids() -> Self {
            let store = Self::default();
            store.lock().temp_ids_replaced = true;
            store
        }

        fn lock(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Seeds a collection.
        pub fn seed(&self, collection: &str, records: Vec<Record>) {
            self.lock()
                .collections
                .insert(collection.to_string(), records);
        }

        /// Current records of a collection.
        pub fn records(&self, collection: &str) -> Vec<Record> {
            self.lock()
                .collections
                .get(collection)
                .cloned()
                .unwrap_or_default()
        }

        /// Every call made so far, in order.
        pub fn calls(&self) -> Vec<RemoteCall> {
            self.lock().calls.clone()
        }

        /// Mutating calls made so far, in order.
        pub fn mutations(&self) -> Vec<RemoteCall> {
            self.lock()
                .calls
                .iter()
                .filter(|c| {
                    matches!(
                        c,
                        RemoteCall::Insert { .. }
                            | RemoteCall::Update { .. }
                            | RemoteCall::Delete { .. }
                    )
                })
                .cloned()
                .collect()
        }

        /// Forgets recorded calls.
        pub fn clear_calls(&self) {
            self.lock().calls.clear();
        }

        /// Makes every call fail with a network error until cleared.
        pub fn set_unreachable(&self, unreachable: bool) {
            self.lock().unreachable = unreachable;
        }

        /// Makes the next `times` calls fail with `failure`.
        pub fn fail_next(&self, failure: MockFailure, times: usize) {
            let mut state = self.lock();
            for _ in 0..times {
                state.next_failures.push_back(failure.clone());
            }
        }

        /// Makes every mutation of `id` fail with `failure` until cleared.
        pub fn fail_record(&self, id: impl Into<RecordId>, failure: MockFailure) {
            self.lock().failing_records.insert(id.into(), failure);
        }

        /// Stops failing mutations of `id`.
        pub fn clear_record_failure(&self, id: &RecordId) {
            self.lock().failing_records.remove(id);
        }

        /// Ids whose mutations were rejected by a per-record failure.
        pub fn rejected_ids(&self) -> HashSet<RecordId> {
            self.lock().rejected_ids.clone()
        }

        fn begin(&self, call: RemoteCall, id: Option<&RecordId>) -> SyncResult<MutexGuard<'_, MockState>> {
            let mut state = self.lock();
            state.calls.push(call);
            if state.unreachable {
                return Err(MockFailure::Network.to_error());
            }
            if let Some(failure) = state.next_failures.pop_front() {
                return Err(failure.to_error());
            }
            if let Some(id) = id {
                if let Some(failure) = state.failing_records.get(id).cloned() {
                    state.rejected_ids.insert(id.clone());
                    return Err(failure.to_error());
                }
            }
            Ok(state)
        }
    }

    #[async_trait]
    impl RemoteStore for MockRemoteStore {
        async fn select(&self, collection: &str) -> SyncResult<Vec<Record>> {
            let state = self.begin(
                RemoteCall::Select {
                    collection: collection.to_string(),
                },
                None,
            )?;
            Ok(state.collections.get(collection).cloned().unwrap_or_default())
        }

        async fn insert(&self, collection: &str, record: &Record) -> SyncResult<Record> {
            let id = record.id();
            let mut state = self.begin(
                RemoteCall::Insert {
                    collection: collection.to_string(),
                    id: id.clone(),
                },
                id.as_ref(),
            )?;

            let mut stored = record.clone();
            let needs_id = match &id {
                None => true,
                Some(id) => state.temp_ids_replaced && id.is_temporary(),
            };
            if needs_id {
                state.next_server_id += 1;
                let server_id = RecordId::new(format!("srv-{}", state.next_server_id));
                stored.set_id(&server_id);
            }

            let records = state.collections.entry(collection.to_string()).or_default();
            let stored_id = stored.id();
            if let Some(existing) = records.iter_mut().find(|r| r.id() == stored_id) {
                *existing = stored.clone();
            } else {
                records.push(stored.clone());
            }
            Ok(stored)
        }

        async fn update(
            &self,
            collection: &str,
            id: &RecordId,
            partial: &Record,
        ) -> SyncResult<Record> {
            let mut state = self.begin(
                RemoteCall::Update {
                    collection: collection.to_string(),
                    id: id.clone(),
                },
                Some(id),
            )?;
            let existing = state
                .collections
                .get_mut(collection)
                .and_then(|records| records.iter_mut().find(|r| r.id().as_ref() == Some(id)))
                .ok_or_else(|| SyncError::not_found(collection, id))?;
            existing.merge(&partial.without_id());
            Ok(existing.clone())
        }

        async fn delete(&self, collection: &str, id: &RecordId) -> SyncResult<()> {
            let mut state = self.begin(
                RemoteCall::Delete {
                    collection: collection.to_string(),
                    id: id.clone(),
                },
                Some(id),
            )?;
            if let Some(records) = state.collections.get_mut(collection) {
                records.retain(|r| r.id().as_ref() != Some(id));
            }
            Ok(())
        }

        async fn health(&self) -> SyncResult<()> {
            let state = self.begin(RemoteCall::Health, None)?;
            drop(state);
            Ok(())
        }
    }
}
