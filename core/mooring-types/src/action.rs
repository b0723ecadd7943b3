//! Pending actions: mutations recorded locally and awaiting remote
//! acknowledgement.
//!
//! An action is immutable apart from its bookkeeping fields (`synced`,
//! `retry_count`, `abandoned`, `last_error`) and, for temp-id retargeting,
//! its payload. Bookkeeping changes go through [`ActionPatch::apply`], which
//! refuses to move `synced` back to false or `retry_count` backwards.

use crate::{ActionId, Error, Record, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// The mutation an action replays against the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl ActionKind {
    /// Lowercase name, as stored.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidActionKind(other.to_string())),
        }
    }
}

/// A durably queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Unique, immutable identifier.
    pub id: ActionId,
    /// What to replay.
    pub kind: ActionKind,
    /// Target collection.
    pub collection: String,
    /// Full record (create), patch plus `id` (update) or `{id}` (delete).
    pub payload: Record,
    /// Enqueue time, the primary replay order key.
    pub enqueued_at: DateTime<Utc>,
    /// Store-assigned sequence number breaking ties on `enqueued_at`.
    #[serde(default)]
    pub seq: u64,
    /// Set once the remote store accepted the action, or it was abandoned.
    pub synced: bool,
    /// Number of failed replay attempts.
    pub retry_count: u32,
    /// Set when the action was given up on after exhausting its retries.
    #[serde(default)]
    pub abandoned: bool,
    /// Message of the most recent replay failure.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingAction {
    /// Creates an unsynced action stamped with the current time.
    pub fn new(kind: ActionKind, collection: impl Into<String>, payload: Record) -> Self {
        Self {
            id: ActionId::new(),
            kind,
            collection: collection.into(),
            payload,
            enqueued_at: Utc::now(),
            seq: 0,
            synced: false,
            retry_count: 0,
            abandoned: false,
            last_error: None,
        }
    }

    /// The id of the record this action targets.
    #[must_use]
    pub fn record_id(&self) -> Option<RecordId> {
        self.payload.id()
    }

    /// Whether this action was abandoned rather than delivered.
    #[must_use]
    pub fn is_dead_letter(&self) -> bool {
        self.synced && self.abandoned
    }

    /// Replay ordering: `enqueued_at`, then `seq`.
    #[must_use]
    pub fn queue_order(&self, other: &Self) -> Ordering {
        self.enqueued_at
            .cmp(&other.enqueued_at)
            .then(self.seq.cmp(&other.seq))
    }
}

/// A partial update of a pending action's bookkeeping fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionPatch {
    pub synced: Option<bool>,
    pub retry_count: Option<u32>,
    pub abandoned: Option<bool>,
    pub last_error: Option<String>,
    pub payload: Option<Record>,
}

impl ActionPatch {
    /// Marks the action synced.
    #[must_use]
    pub fn synced() -> Self {
        Self {
            synced: Some(true),
            ..Default::default()
        }
    }

    /// Sets the retry count.
    #[must_use]
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Flags the action as abandoned.
    #[must_use]
    pub fn abandoned(mut self) -> Self {
        self.synced = Some(true);
        self.abandoned = Some(true);
        self
    }

    /// Records a failure message.
    #[must_use]
    pub fn last_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(message.into());
        self
    }

    /// Replaces the payload.
    #[must_use]
    pub fn payload(mut self, payload: Record) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Applies the patch. Returns true if the action changed.
    ///
    /// `synced` only moves false→true, `retry_count` never decreases and
    /// `abandoned` is sticky.
    pub fn apply(&self, action: &mut PendingAction) -> bool {
        let before = action.clone();

        if self.synced == Some(true) {
            action.synced = true;
        }
        if let Some(count) = self.retry_count {
            action.retry_count = action.retry_count.max(count);
        }
        if self.abandoned == Some(true) {
            action.abandoned = true;
        }
        if let Some(message) = &self.last_error {
            action.last_error = Some(message.clone());
        }
        if let Some(payload) = &self.payload {
            action.payload = payload.clone();
        }

        *action != before
    }
}
