//! Recovery strategies.
//!
//! A strategy is an async remediation attempt for one category of error. It
//! reports `true` when the condition it targets has been cleared.

use crate::record::ErrorRecord;
use async_trait::async_trait;
use mooring_storage::LocalStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// An async remediation attempt.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Short name used in logs and outcomes.
    fn name(&self) -> &str;

    /// Tries to remediate. Returns true on success.
    async fn attempt(&self, error: &ErrorRecord) -> bool;
}

/// Network strategy: succeeds once the connectivity signal reports online,
/// waiting at most `timeout`.
pub struct AwaitConnectivity {
    online: watch::Receiver<bool>,
    timeout: Duration,
}

impl AwaitConnectivity {
    pub fn new(online: watch::Receiver<bool>, timeout: Duration) -> Self {
        Self { online, timeout }
    }
}

#[async_trait]
impl RecoveryStrategy for AwaitConnectivity {
    fn name(&self) -> &str {
        "await-connectivity"
    }

    async fn attempt(&self, _error: &ErrorRecord) -> bool {
        let mut online = self.online.clone();
        if *online.borrow_and_update() {
            return true;
        }
        let wait = async move { online.wait_for(|up| *up).await.is_ok() };
        match tokio::time::timeout(self.timeout, wait).await {
            Ok(true) => true,
            Ok(false) => {
                debug!("Connectivity signal dropped while waiting");
                false
            }
            Err(_) => false,
        }
    }
}

/// Storage strategy: purges cache entries that may be corrupt.
///
/// When the error context names a `collection`, that collection's cache is
/// dropped entirely; otherwise only expired entries are removed.
pub struct PurgeCache {
    store: Arc<dyn LocalStore>,
}

impl PurgeCache {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecoveryStrategy for PurgeCache {
    fn name(&self) -> &str {
        "purge-cache"
    }

    async fn attempt(&self, error: &ErrorRecord) -> bool {
        let collection = error.context("collection");
        let expired_only = collection.is_none();
        match self.store.purge_cached(collection, expired_only).await {
            Ok(removed) => {
                debug!(
                    "Purged {} cache entries (collection: {:?})",
                    removed, collection
                );
                true
            }
            Err(e) => {
                warn!("Cache purge failed: {}", e);
                false
            }
        }
    }
}

/// A strategy backed by a closure.
pub struct FnStrategy<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnStrategy<F>
where
    F: Fn(ErrorRecord) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> RecoveryStrategy for FnStrategy<F>
where
    F: Fn(ErrorRecord) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, error: &ErrorRecord) -> bool {
        (self.f)(error.clone()).await
    }
}
