use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::runner::Worker;

/// Drives a [`Worker`] at a fixed interval. The next poll is scheduled only
/// after the current one has finished; failures are logged and retried at
/// the same interval.
pub struct UpdatePoller {
    interval: Duration,
}

impl UpdatePoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub async fn run(&self, worker: &Worker, shutdown: CancellationToken) {
        tracing::info!(
            server = %worker.server(),
            interval_ms = self.interval.as_millis() as u64,
            "Polling coordinator"
        );

        loop {
            if let Err(e) = worker.poll_once().await {
                tracing::warn!(server = %worker.server(), error = %e, "Update failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        let active = worker.queue().lock().await.active_count();
        tracing::info!(active_tasks = active, "Client stopped polling");
    }
}
