//! Core type definitions for Mooring.
//!
//! This crate defines the plain data types shared by every layer of the
//! offline-first sync engine:
//! - Action and record identifiers
//! - Records (JSON objects addressed by their `id` field)
//! - Pending actions queued while offline
//! - Cached record snapshots held by the local store
//!
//! Nothing here performs I/O.

mod action;
mod cache;
mod ids;
mod record;

pub use action::{ActionKind, ActionPatch, PendingAction};
pub use cache::CachedRecord;
pub use ids::{ActionId, RecordId, TEMP_ID_PREFIX};
pub use record::Record;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),

    #[error("invalid action kind: {0}")]
    InvalidActionKind(String),
}
