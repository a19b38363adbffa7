//! Teardown of the background health monitor.
//!
//! The monitor runs forever on its own, so the process owns its lifecycle
//! here: one watch channel the monitor listens on, and one join handle. When
//! the process receives a termination signal the channel is closed, and the
//! monitor gets a bounded grace period to drain before it is aborted. A
//! monitor panic is surfaced instead of being swallowed.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("The background monitor panicked during shutdown")]
    Panic(#[from] JoinError),
    #[error("Graceful shutdown timed out after {0:?}")]
    Timeout(Duration),
}

/// Owns the shutdown signal and the join handle of the task listening on it.
pub struct ShutdownManager {
    shutdown_tx: watch::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(());
        Self { shutdown_tx, task: None }
    }

    /// A receiver the managed task should watch to learn when to exit.
    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Spawns the managed task. There is exactly one.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug_assert!(self.task.is_none(), "monitor already spawned");
        self.task = Some(tokio::spawn(task));
    }

    /// Forced teardown: abort the task without waiting for cleanup.
    pub fn abort(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Signals shutdown and waits up to `grace` for the task to finish.
    /// Consumes the manager. A task still running when the grace period ends
    /// is aborted and a timeout error is returned.
    pub async fn graceful_shutdown(self, grace: Duration) -> Result<(), ShutdownError> {
        let ShutdownManager { shutdown_tx, task } = self;

        // Dropping the sender wakes the subscribed receiver.
        drop(shutdown_tx);

        let Some(mut task) = task else { return Ok(()) };
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => {
                info!("Background monitor stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Background monitor panicked during shutdown");
                Err(ShutdownError::Panic(e))
            }
            Err(_) => {
                error!(grace = ?grace, "Grace period exceeded, aborting the monitor");
                task.abort();
                Err(ShutdownError::Timeout(grace))
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn monitor_drains_on_signal() {
        let mut manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        manager.spawn(async move {
            let _ = rx.changed().await;
        });

        assert!(manager.graceful_shutdown(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn stuck_monitor_hits_the_grace_period() {
        let mut manager = ShutdownManager::new();
        manager.spawn(async {
            sleep(Duration::from_secs(30)).await;
        });

        let res = manager.graceful_shutdown(Duration::from_millis(50)).await;
        assert!(matches!(res, Err(ShutdownError::Timeout(_))));
    }

    #[tokio::test]
    async fn panic_is_reported() {
        let mut manager = ShutdownManager::new();
        manager.spawn(async {
            panic!("boom");
        });

        let res = manager.graceful_shutdown(Duration::from_secs(1)).await;
        assert!(matches!(res, Err(ShutdownError::Panic(_))));
    }

    #[tokio::test]
    async fn shutdown_with_nothing_spawned_is_immediate() {
        let manager = ShutdownManager::new();
        assert!(manager.graceful_shutdown(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn abort_cancels_the_monitor() {
        let mut manager = ShutdownManager::new();
        manager.spawn(async {
            sleep(Duration::from_secs(30)).await;
        });

        manager.abort();
        let task = manager.task.take().unwrap();
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn finished_monitor_does_not_block_shutdown() {
        let mut manager = ShutdownManager::new();
        manager.spawn(async {});
        sleep(Duration::from_millis(20)).await;
        assert!(manager.graceful_shutdown(Duration::from_secs(1)).await.is_ok());
    }
}
