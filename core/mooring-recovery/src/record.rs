//! Error records and their classification.

use chrono::{DateTime, Utc};
use mooring_storage::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Broad category of a failure, used to pick recovery strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Storage,
    Api,
    Authentication,
    Authorization,
    Validation,
    Unknown,
}

impl ErrorCategory {
    /// Every category, in declaration order.
    pub const ALL: [ErrorCategory; 7] = [
        Self::Network,
        Self::Storage,
        Self::Api,
        Self::Authentication,
        Self::Authorization,
        Self::Validation,
        Self::Unknown,
    ];

    /// Severity assigned when the caller does not pick one.
    #[must_use]
    pub const fn default_severity(&self) -> Severity {
        match self {
            Self::Storage | Self::Authentication => Severity::High,
            Self::Validation => Severity::Low,
            Self::Network | Self::Api | Self::Authorization | Self::Unknown => Severity::Medium,
        }
    }

    /// Best-effort classification of a free-form error message, for errors
    /// that do not implement [`Classify`].
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

        if has(&["401", "unauthenticated", "unauthorized", "token expired", "not authenticated"]) {
            Self::Authentication
        } else if has(&["403", "forbidden", "permission denied", "access denied"]) {
            Self::Authorization
        } else if has(&["400", "422", "validation", "invalid", "constraint"]) {
            Self::Validation
        } else if has(&["network", "timeout", "timed out", "connection", "offline", "dns", "fetch"]) {
            Self::Network
        } else if has(&["storage", "quota", "database", "disk", "sqlite"]) {
            Self::Storage
        } else if has(&["500", "502", "503", "504", "429", "server error", "api"]) {
            Self::Api
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Api => "api",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// How bad a failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Errors that know their own category.
pub trait Classify {
    /// The recovery category of this error.
    fn category(&self) -> ErrorCategory;

    /// The severity of this error.
    fn severity(&self) -> Severity {
        self.category().default_severity()
    }
}

impl Classify for StorageError {
    fn category(&self) -> ErrorCategory {
        match self {
            StorageError::MissingRecordId { .. } => ErrorCategory::Validation,
            _ => ErrorCategory::Storage,
        }
    }
}

/// An in-memory record of a captured failure. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub context: BTreeMap<String, String>,
    pub captured_at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Creates a record with the category's default severity.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            severity: category.default_severity(),
            message: message.into(),
            context: BTreeMap::new(),
            captured_at: Utc::now(),
        }
    }

    /// Builds a record from an error that classifies itself.
    pub fn from_error<E: Classify + fmt::Display + ?Sized>(error: &E) -> Self {
        Self::new(error.category(), error.to_string()).with_severity(error.severity())
    }

    /// Builds a record from any displayable error, classifying it by message.
    pub fn from_display<E: fmt::Display + ?Sized>(error: &E) -> Self {
        let message = error.to_string();
        Self::new(ErrorCategory::from_message(&message), message)
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Looks up a context value.
    #[must_use]
    pub fn context(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }
}
