//! Graceful shutdown coordination.

use crate::error::Result;
use crate::types::Event;

use super::MultiDownloader;

impl MultiDownloader {
    /// Gracefully shut down the engine
    ///
    /// Shutdown sequence:
    /// 1. Stop accepting new tasks
    /// 2. Cancel all live loaders (cooperative; checkpoints are flushed)
    /// 3. Wait for active transfers to wind down, with a timeout
    /// 4. Close the admission semaphore and stop the background loops
    ///
    /// Task state is written through during normal operation, so there is
    /// no bulk persistence step here — whatever was flushed last is what a
    /// future session resumes from.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("initiating graceful shutdown");

        self.queue_state
            .accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);

        // Cancel every live loader; transfers notice between chunks
        let drained: Vec<_> = self.loaders.lock().await.drain().collect();
        for (id, loader) in &drained {
            tracing::debug!(task_id = id.0, "signalling cancellation for shutdown");
            loader.cancel.cancel();
        }

        let shutdown_timeout = std::time::Duration::from_secs(30);
        if tokio::time::timeout(shutdown_timeout, self.wait_for_active_transfers())
            .await
            .is_err()
        {
            tracing::warn!("timeout waiting for transfers to wind down, proceeding with shutdown");
        }

        // Stops the admission loop's pending acquire and both background loops
        self.queue_state.concurrent_limit.close();
        self.shutdown_token.cancel();

        self.emit_event(Event::Shutdown);
        tracing::info!("graceful shutdown complete");

        Ok(())
    }

    /// Wait for the active-transfer map to drain
    async fn wait_for_active_transfers(&self) {
        loop {
            let active_count = {
                let active = self.queue_state.active.lock().await;
                active.len()
            };

            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "waiting for active transfers to finish");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
