//! Cached record snapshots.

use crate::{Record, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A snapshot of a remote record held by the local store.
///
/// Snapshots are superseded, never merged: a newer write for the same
/// `(collection, id)` replaces the previous one entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    /// Collection the record belongs to.
    pub collection: String,
    /// The record as last seen.
    pub record: Record,
    /// When the snapshot was written.
    pub cached_at: DateTime<Utc>,
    /// When the snapshot stops being trustworthy, if ever.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedRecord {
    /// Creates a snapshot stamped with the current time.
    pub fn new(
        collection: impl Into<String>,
        record: Record,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            collection: collection.into(),
            record,
            cached_at: Utc::now(),
            expires_at,
        }
    }

    /// The cached record's identifier.
    #[must_use]
    pub fn id(&self) -> Option<RecordId> {
        self.record.id()
    }

    /// Whether the snapshot had expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Whether the snapshot has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
