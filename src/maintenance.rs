//! Background cache sweeping
//!
//! Expired entries are normally dropped lazily when read. A periodic sweep
//! bounds growth for keys that are never read again, in particular records
//! on disk.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::{CleanupReport, TieredCache};

/// Handle for controlling the background sweep task
pub struct SweepHandle {
    /// Flag to signal shutdown
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Spawns a task running [`TieredCache::cleanup`] every `interval`
    ///
    /// The first sweep happens one full interval after spawning.
    pub fn spawn(cache: Arc<TieredCache>, interval: Duration) -> Self {
        Self::spawn_with_reports(cache, interval, None)
    }

    /// Like [`SweepHandle::spawn`], also sending each report to `reports`
    pub fn spawn_with_reports(
        cache: Arc<TieredCache>,
        interval: Duration,
        reports: Option<mpsc::Sender<CleanupReport>>,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the first tick (immediate)
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = cache.cleanup();
                        if report.memory_removed + report.persistent_removed > 0 {
                            log::info!(
                                "cache sweep removed {} memory and {} persistent entries",
                                report.memory_removed,
                                report.persistent_removed
                            );
                        }
                        if let Some(tx) = &reports {
                            let _ = tx.send(report).await;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self { shutdown_tx, task }
    }

    /// Stops the sweep task and waits for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}
