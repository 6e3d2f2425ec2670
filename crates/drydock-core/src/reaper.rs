//! Background eviction of idle units.

use crate::pool::Pool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Recurring task that evicts units idle past the pool's idle timeout.
///
/// Must be stopped with [`stop`](Self::stop) before the pool is torn down so
/// no eviction races with teardown.
pub struct IdleReaper {
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl IdleReaper {
    /// Spawn the reaper loop on the current tokio runtime.
    pub fn start(pool: Arc<Pool>, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_notify = Arc::new(Notify::new());

        let handle = tokio::spawn(Self::reap_loop(
            pool,
            interval,
            Arc::clone(&shutdown),
            Arc::clone(&shutdown_notify),
        ));

        tracing::info!(interval_secs = interval.as_secs(), "Idle reaper started");
        Self {
            shutdown,
            shutdown_notify,
            handle: Some(handle),
        }
    }

    async fn reap_loop(
        pool: Arc<Pool>,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
        shutdown_notify: Arc<Notify>,
    ) {
        tracing::debug!("Reaper loop started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_notify.notified() => {
                    tracing::info!("Idle reaper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(interval) => {
                    if shutdown.load(Ordering::Relaxed) {
                        tracing::debug!("Reaper detected shutdown flag");
                        break;
                    }

                    let evicted = pool.evict_idle(Instant::now()).await;
                    if evicted > 0 {
                        tracing::debug!(evicted, pool_size = pool.size(), "Reaper cycle complete");
                    }
                }
            }
        }

        tracing::debug!("Reaper loop exited");
    }

    /// Check if the reaper task is running.
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shutdown.load(Ordering::Relaxed)
    }

    /// Signal the loop to stop and wait for its current cycle to finish.
    pub async fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // notify_one keeps a permit if the loop is mid-cycle, so it exits on its next select.
        self.shutdown_notify.notify_one();

        if let Some(handle) = self.handle.take() {
            tracing::debug!("Waiting for reaper task to complete");
            if let Err(e) = handle.await {
                tracing::error!(error = ?e, "Reaper task panicked");
            }
            tracing::info!("Idle reaper stopped");
        }
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::warn!("Idle reaper dropped without stop, aborting");
            handle.abort();
        }
    }
}
