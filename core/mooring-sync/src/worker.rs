//! Background sync worker.
//!
//! The worker owns a [`Reconciler`] and runs a pass when:
//! - the connectivity monitor goes from offline to online,
//! - the periodic timer fires while online,
//! - a [`SyncCommand::SyncNow`] arrives through the handle,
//! - the worker starts while online.
//!
//! Results are published as [`SyncEvent`]s on a broadcast channel.

use crate::error::{SyncError, SyncResult};
use crate::reconciler::{Reconciler, SyncSummary};
use mooring_types::ActionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Commands accepted by the worker loop.
#[derive(Debug)]
pub enum SyncCommand {
    /// Run a pass now; the summary is sent back if a reply channel is given.
    SyncNow {
        reply: Option<oneshot::Sender<SyncResult<SyncSummary>>>,
    },
    /// Stop the loop.
    Shutdown,
}

/// Events published by the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A pass that had actions to replay finished.
    PassCompleted(SyncSummary),
    /// A pass failed on local storage.
    PassFailed(String),
    /// An action exhausted its retries and was kept as a dead letter.
    ActionAbandoned(ActionId),
    /// The connectivity monitor changed state.
    ConnectivityChanged(bool),
}

/// Configures and spawns the worker loop.
pub struct SyncWorker {
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

impl SyncWorker {
    /// Creates a worker using the reconciler's configured sync interval.
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        let interval = reconciler.config().sync_interval();
        Self {
            reconciler,
            interval,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawns the loop on the current runtime.
    pub fn spawn(self) -> SyncWorkerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let events = event_tx.clone();
        // Subscribe before spawning so a transition that happens before the
        // task is first polled is still observed.
        let online_rx = self.reconciler.monitor().subscribe();

        let task = tokio::spawn(async move {
            self.run(command_rx, online_rx, event_tx).await;
        });

        SyncWorkerHandle {
            commands: command_tx,
            events,
            task,
        }
    }

    async fn run(
        self,
        mut commands: mpsc::Receiver<SyncCommand>,
        mut online_rx: watch::Receiver<bool>,
        events: broadcast::Sender<SyncEvent>,
    ) {
        let mut was_online = *online_rx.borrow_and_update();

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Sync worker started (interval {:?})", self.interval);

        if was_online {
            let _ = self.pass(&events).await;
        }

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(SyncCommand::SyncNow { reply }) => {
                            let result = self.pass(&events).await;
                            if let Some(reply) = reply {
                                let _ = reply.send(result);
                            }
                        }
                        Some(SyncCommand::Shutdown) | None => break,
                    }
                }

                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online == was_online {
                        continue;
                    }
                    was_online = online;
                    let _ = events.send(SyncEvent::ConnectivityChanged(online));
                    if online {
                        debug!("Back online, starting sync pass");
                        let _ = self.pass(&events).await;
                    }
                }

                _ = ticker.tick() => {
                    if self.reconciler.monitor().is_online() {
                        let _ = self.pass(&events).await;
                    }
                }
            }
        }

        info!("Sync worker stopped");
    }

    async fn pass(&self, events: &broadcast::Sender<SyncEvent>) -> SyncResult<SyncSummary> {
        match self.reconciler.sync().await {
            Ok(summary) => {
                for id in &summary.abandoned_ids {
                    let _ = events.send(SyncEvent::ActionAbandoned(*id));
                }
                if !summary.is_empty() {
                    let _ = events.send(SyncEvent::PassCompleted(summary.clone()));
                }
                Ok(summary)
            }
            Err(e) => {
                warn!("Sync pass failed: {}", e);
                let _ = events.send(SyncEvent::PassFailed(e.to_string()));
                Err(e)
            }
        }
    }
}

/// Handle to a running worker.
pub struct SyncWorkerHandle {
    commands: mpsc::Sender<SyncCommand>,
    events: broadcast::Sender<SyncEvent>,
    task: JoinHandle<()>,
}

impl SyncWorkerHandle {
    /// Runs a pass and waits for its summary.
    pub async fn sync_now(&self) -> SyncResult<SyncSummary> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SyncCommand::SyncNow { reply: Some(reply) })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)?
    }

    /// Subscribes to worker events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the loop and waits for it to exit. An in-flight pass finishes
    /// first.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SyncCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Sync worker task failed: {}", e);
        }
    }
}
