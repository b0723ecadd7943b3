//! Error types for the sync layer.

use mooring_recovery::{Classify, ErrorCategory, Severity};
use mooring_storage::StorageError;
use mooring_types::RecordId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The remote answered with a server-side or unexpected status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The remote rejected the payload.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or expired credentials.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Credentials valid but insufficient.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The record does not exist (remotely or in the collection).
    #[error("record not found: {collection}/{id}")]
    NotFound { collection: String, id: RecordId },

    /// Local store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record model error.
    #[error("record error: {0}")]
    Record(#[from] mooring_types::Error),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Builds a not-found error.
    pub fn not_found(collection: impl Into<String>, id: &RecordId) -> Self {
        SyncError::NotFound {
            collection: collection.into(),
            id: id.clone(),
        }
    }

    /// Returns true if the failure means the remote is unreachable or
    /// temporarily unable to serve, so the operation may succeed later.
    pub fn is_connectivity(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout => true,
            SyncError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns true if replaying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_connectivity()
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout
        } else if let Some(status) = e.status() {
            SyncError::Api {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            SyncError::Network(e.to_string())
        }
    }
}

impl Classify for SyncError {
    fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Network(_) | SyncError::Timeout => ErrorCategory::Network,
            SyncError::Api { .. } => ErrorCategory::Api,
            SyncError::Validation(_) | SyncError::Record(_) => ErrorCategory::Validation,
            SyncError::Auth(_) => ErrorCategory::Authentication,
            SyncError::Forbidden(_) => ErrorCategory::Authorization,
            SyncError::Storage(e) => e.category(),
            SyncError::Serialization(_) | SyncError::NotFound { .. } | SyncError::ChannelClosed => {
                ErrorCategory::Unknown
            }
        }
    }

    fn severity(&self) -> Severity {
        match self {
            SyncError::Auth(_) => Severity::High,
            SyncError::Storage(e) => e.severity(),
            other => other.category().default_severity(),
        }
    }
}
