//! Process-termination teardown.

use crate::pool::Pool;
use crate::reaper::IdleReaper;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Result of a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Units destroyed successfully.
    pub destroyed: usize,
    /// Whether a running reaper had to be stopped.
    pub reaper_stopped: bool,
}

/// Owns the idle reaper's lifecycle and tears the pool down on exit.
///
/// Order matters: the reaper is stopped and joined first so no eviction
/// runs concurrently with [`Pool::destroy_all`].
pub struct ShutdownCoordinator {
    pool: Arc<Pool>,
    reaper: Mutex<Option<IdleReaper>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator for `pool`. No reaper runs until
    /// [`start_reaper`](Self::start_reaper) is called.
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            pool,
            reaper: Mutex::new(None),
        }
    }

    /// Start the idle reaper if it is not already running.
    pub async fn start_reaper(&self, interval: Duration) {
        let mut reaper = self.reaper.lock().await;
        if reaper.is_some() {
            tracing::warn!("Idle reaper already started");
            return;
        }
        *reaper = Some(IdleReaper::start(Arc::clone(&self.pool), interval));
    }

    /// Check if the reaper is running.
    pub async fn reaper_running(&self) -> bool {
        self.reaper
            .lock()
            .await
            .as_ref()
            .is_some_and(IdleReaper::is_running)
    }

    /// Stop the reaper, wait for it, then destroy every unit.
    ///
    /// Safe to call more than once; later calls find nothing left to do.
    pub async fn shutdown(&self) -> ShutdownReport {
        tracing::info!("Shutting down execution engine");

        let reaper = self.reaper.lock().await.take();
        let reaper_stopped = match reaper {
            Some(mut reaper) => {
                reaper.stop().await;
                true
            }
            None => false,
        };

        let destroyed = self.pool.destroy_all().await;
        tracing::info!(destroyed, reaper_stopped, "Execution engine shut down");

        ShutdownReport {
            destroyed,
            reaper_stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::{CoreError, Result};
    use crate::runtime::{ContainerRuntime, ExecOutput, RuntimeHandle, UnitSpec};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Refuses to remove every other unit.
    #[derive(Default)]
    struct FlakyRemoveRuntime {
        created: AtomicU64,
    }

    #[async_trait]
    impl ContainerRuntime for FlakyRemoveRuntime {
        async fn create(&self, _spec: &UnitSpec) -> Result<RuntimeHandle> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(RuntimeHandle::new(format!("c{n}")))
        }

        async fn exec(
            &self,
            _handle: &RuntimeHandle,
            _command: &[String],
            _env: &BTreeMap<String, String>,
            _timeout: Duration,
        ) -> Result<ExecOutput> {
            Err(CoreError::Execution("not used".into()))
        }

        async fn remove(&self, handle: &RuntimeHandle) -> Result<()> {
            if handle.as_str() == "c0" {
                return Err(CoreError::RuntimeUnavailable("daemon hiccup".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shutdown_tolerates_destroy_failures() {
        let config = EngineConfig::builder().max_units(3).build().unwrap();
        let pool = Arc::new(Pool::new(Arc::new(FlakyRemoveRuntime::default()), &config));

        let leases = vec![
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ];
        for lease in leases {
            lease.release(true).await;
        }

        let coordinator = ShutdownCoordinator::new(Arc::clone(&pool));
        coordinator.start_reaper(Duration::from_secs(60)).await;
        assert!(coordinator.reaper_running().await);

        let report = coordinator.shutdown().await;
        assert_eq!(report.destroyed, 2);
        assert!(report.reaper_stopped);
        assert_eq!(pool.size(), 0);
        assert!(!coordinator.reaper_running().await);

        let again = coordinator.shutdown().await;
        assert_eq!(again.destroyed, 0);
        assert!(!again.reaper_stopped);
    }
}
