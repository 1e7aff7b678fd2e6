//! Background pool maintenance.
//!
//! The maintenance loop runs on a fixed interval, independent of task
//! flow. Each tick it settles queued tasks past their deadline, reclaims
//! Idle workers that have outlived the idle timeout (never taking the pool
//! below its minimum size) and recomputes the `ResourceMetrics` snapshot.
//!
//! The loop only holds a weak reference to the pool. It exits once the
//! last `ResourceManager` clone is dropped, even without a shutdown.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::pool::{ResourceManager, WeakResourceManager};

/// Handle to a running maintenance loop, used for shutdown.
#[derive(Debug)]
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the loop to stop after its current tick.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

pub struct MaintenanceLoop {
    manager: WeakResourceManager,
    interval: Duration,
}

impl MaintenanceLoop {
    pub fn new(manager: &ResourceManager) -> Self {
        Self {
            manager: manager.downgrade(),
            interval: manager.config().maintenance_interval,
        }
    }

    pub fn spawn(self) -> MaintenanceHandle {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        debug!(interval = ?self.interval, "maintenance loop starting");

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        debug!("maintenance loop cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let Some(manager) = self.manager.upgrade() else {
                            debug!("maintenance loop: pool dropped");
                            break;
                        };
                        if manager.is_shut_down() {
                            debug!("maintenance loop: pool shut down");
                            break;
                        }
                        Self::tick(&manager);
                    }
                }
            }
        });

        MaintenanceHandle { cancel, join }
    }

    fn tick(manager: &ResourceManager) {
        let expired = manager.expire_overdue();
        let reclaimed = manager.reclaim_idle();
        let metrics = manager.refresh_metrics();
        trace!(
            total = metrics.total_workers,
            busy = metrics.busy_workers,
            idle = metrics.idle_workers,
            errors = metrics.error_workers,
            queued = metrics.queue_depth,
            load = metrics.system_load,
            expired,
            reclaimed = reclaimed.len(),
            "pool maintenance"
        );
    }
}
