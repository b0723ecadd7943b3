//! Online/offline signal.

use crate::remote::RemoteStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Tracks whether the remote store is believed reachable.
///
/// The flag is a hint: a remote call failing with a connectivity error is the
/// authoritative signal and callers fall back to the offline path regardless.
/// Clones share the same signal.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with an initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Updates the state. Subscribers are notified only on an actual change;
    /// returns whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
        changed
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Waits until online, at most `timeout`. Returns the state at return.
    pub async fn wait_online(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        let wait = async move { rx.wait_for(|online| *online).await.is_ok() };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    /// Spawns a task that calls [`RemoteStore::health`] every `interval` and
    /// feeds the result into this monitor. Abort the handle to stop probing.
    pub fn spawn_probe(&self, remote: Arc<dyn RemoteStore>, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match remote.health().await {
                    Ok(()) => {
                        monitor.set_online(true);
                    }
                    Err(e) => {
                        debug!("Health probe failed: {}", e);
                        monitor.set_online(false);
                    }
                }
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
