//! Background sync service
//!
//! Drains the queue whenever connectivity comes back, on every poll tick
//! while online, and on demand through [`SyncServiceHandle::trigger`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::{
    sync::Synchronizer,
    types::{Connectivity, SyncStatus},
};

/// Background synchronizer task
pub struct SyncService {
    synchronizer: Arc<Synchronizer>,
    connectivity: watch::Receiver<Connectivity>,
    status: watch::Sender<SyncStatus>,
    trigger: Arc<Notify>,
    shutdown: Arc<Notify>,
    poll_interval: Duration,
}

/// Handle to a running [`SyncService`]
pub struct SyncServiceHandle {
    status: watch::Receiver<SyncStatus>,
    trigger: Arc<Notify>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SyncService {
    /// Spawn the service on the current runtime
    pub fn spawn(
        synchronizer: Arc<Synchronizer>,
        connectivity: watch::Receiver<Connectivity>,
        poll_interval: Duration,
    ) -> SyncServiceHandle {
        let initial = match *connectivity.borrow() {
            Connectivity::Online => SyncStatus::Online,
            Connectivity::Offline => SyncStatus::Offline,
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let trigger = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());

        let service = SyncService {
            synchronizer,
            connectivity,
            status: status_tx,
            trigger: trigger.clone(),
            shutdown: shutdown.clone(),
            poll_interval,
        };
        let task = tokio::spawn(service.run());

        SyncServiceHandle {
            status: status_rx,
            trigger,
            shutdown,
            task,
        }
    }

    async fn run(mut self) {
        tracing::info!(poll_secs = self.poll_interval.as_secs(), "Starting sync service");

        // First poll one interval out; startup runs its own sync below
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + self.poll_interval, self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        if self.is_online() {
            self.sync_once().await;
        }

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,

                changed = self.connectivity.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Connectivity source dropped, stopping sync service");
                        break;
                    }
                    if self.is_online() {
                        tracing::info!("Connectivity restored");
                        self.sync_once().await;
                    } else {
                        tracing::info!("Connectivity lost");
                        self.status.send_replace(SyncStatus::Offline);
                    }
                }

                _ = interval.tick() => {
                    if self.is_online() {
                        self.sync_once().await;
                    }
                }

                _ = self.trigger.notified() => {
                    if self.is_online() {
                        self.sync_once().await;
                    } else {
                        tracing::debug!("Sync requested while offline, ignoring");
                    }
                }
            }
        }

        tracing::info!("Sync service stopped");
    }

    fn is_online(&self) -> bool {
        *self.connectivity.borrow() == Connectivity::Online
    }

    async fn sync_once(&self) {
        self.status.send_replace(SyncStatus::Syncing);

        match self.synchronizer.sync_pending().await {
            Ok(_) => {
                let next = if self.is_online() {
                    SyncStatus::Online
                } else {
                    SyncStatus::Offline
                };
                self.status.send_replace(next);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Background sync failed");
                self.status.send_replace(SyncStatus::Error);
            }
        }
    }
}

impl SyncServiceHandle {
    /// Current status
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Status updates
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Request a run now (ignored while offline)
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stop the service and wait for the task to end
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Sync service task panicked");
        }
    }
}
