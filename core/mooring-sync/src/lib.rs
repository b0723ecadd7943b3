//! Offline-first sync engine for Mooring.
//!
//! Applications read and write records through an [`OfflineCollection`].
//! While the remote store is reachable, calls go straight to it and results
//! are written through to the local cache. While it is not, changes are
//! applied optimistically and queued as pending actions, to be replayed in
//! order by the [`Reconciler`] once connectivity returns.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Queue**: durable, ordered log of unacknowledged mutations
//! - **Reconciler**: replays the queue against the remote store
//! - **Collection**: the application-facing read/write handle
//! - **Connectivity**: online/offline signal and health probe
//! - **Worker**: background task that decides when to reconcile
//! - **Remote**: the [`RemoteStore`] seam, with an HTTP implementation
//!
//! ## Replay
//!
//! 1. **Snapshot**: unsynced actions are read in enqueue order
//! 2. **Dispatch**: each action becomes an insert, update or delete
//! 3. **Retry**: transient failures are retried under a backoff policy
//! 4. **Settle**: success marks the action synced; failure counts a retry,
//!    and after too many the action is kept as a dead letter
//!
//! # Example
//!
//! ```
//! use mooring_storage::MemoryLocalStore;
//! use mooring_sync::remote::mock::MockRemoteStore;
//! use mooring_sync::{ConnectivityMonitor, OfflineCollection};
//! use std::sync::Arc;
//!
//! let monitor = ConnectivityMonitor::new(false);
//! let notes = OfflineCollection::new(
//!     "notes",
//!     Arc::new(MemoryLocalStore::new()),
//!     Arc::new(MockRemoteStore::new()),
//!     monitor,
//! );
//! assert!(notes.data().is_empty());
//! ```

mod collection;
mod config;
mod connectivity;
mod error;
pub mod http;
mod queue;
mod reconciler;
pub mod remote;
mod worker;

pub use collection::{CollectionSnapshot, LoadStatus, OfflineCollection};
pub use config::SyncConfig;
pub use connectivity::ConnectivityMonitor;
pub use error::{SyncError, SyncResult};
pub use http::{HttpRemoteConfig, HttpRemoteStore};
pub use queue::PendingActionQueue;
pub use reconciler::{PassReport, Reconciler, SyncSummary};
pub use remote::RemoteStore;
pub use worker::{SyncCommand, SyncEvent, SyncWorker, SyncWorkerHandle};
