//! Shutdown coordination.

use crate::error::Result;
use crate::types::{Event, GroupId};

use super::QueueEngine;
use std::sync::atomic::Ordering;

impl QueueEngine {
    /// Gracefully shut down the engine
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new URLs and downloads
    /// 2. Pauses every downloading group, interrupting its tools
    /// 3. Revokes all queued jobs
    /// 4. Waits for running jobs to exit with a timeout (30 seconds)
    /// 5. Emits [`Event::Shutdown`]
    ///
    /// Paused groups keep their options and can be resumed by a new engine
    /// built from persisted state.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new work
        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new work");

        // 2. Pause active downloads so their state reflects the interruption
        for id in self.downloading_groups() {
            if let Err(e) = self.cancel_group(id).await {
                tracing::debug!(group_id = %id, error = %e, "Could not pause group");
            }
        }

        // 3. Revoke everything else
        self.limiter.shutdown();
        tracing::info!("Revoked all queued jobs");

        // 4. Wait for running jobs with timeout
        let shutdown_timeout = std::time::Duration::from_secs(30);
        let wait_result = tokio::time::timeout(shutdown_timeout, self.wait_for_running_jobs()).await;

        match wait_result {
            Ok(Ok(())) => {
                tracing::info!("All running jobs exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Error while waiting for jobs to exit");
            }
            Err(_) => {
                tracing::warn!(
                    running = self.limiter.in_flight(),
                    "Timeout waiting for jobs to exit, proceeding with shutdown"
                );
            }
        }

        // 5. Emit shutdown event
        let _ = self.event_tx.send(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    fn downloading_groups(&self) -> Vec<GroupId> {
        self.with_model(|model, _| {
            model
                .store
                .groups()
                .filter(|g| {
                    model
                        .states
                        .group_state(g)
                        .is_some_and(|s| s.is_downloading())
                })
                .map(|g| g.id)
                .collect()
        })
    }

    /// Wait until no job holds a concurrency slot
    async fn wait_for_running_jobs(&self) -> Result<()> {
        loop {
            let running = self.limiter.in_flight();
            if running == 0 {
                return Ok(());
            }

            tracing::debug!(running, "Waiting for running jobs to exit");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
