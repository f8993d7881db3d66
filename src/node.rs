use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::persistence::{run_periodic_flush, JobWriter, PersistQueue};
use crate::scheduler::JobStore;
use crate::server::{run_server, ServerState};

/// The coordinator process: store, persistence, overview logging and HTTP.
pub struct Node {
    pub config: ServerConfig,
    pub coordinator: Arc<Coordinator>,
    queue: PersistQueue,
}

impl Node {
    /// Prepare the database directory and load persisted jobs.
    ///
    /// # Errors
    ///
    /// Fails if the config is invalid or the jobs directory cannot be created
    /// or listed. Individual unreadable job files are skipped, not fatal.
    pub async fn start(config: ServerConfig) -> Result<(Self, JobWriter)> {
        let config = config.validate()?;
        let jobs_root = config.jobs_root();

        if !tokio::fs::try_exists(&jobs_root).await? {
            tracing::info!(path = %jobs_root.display(), "Creating database directory");
            tokio::fs::create_dir_all(&jobs_root).await?;
        }

        let store = JobStore::load(&jobs_root).await?;
        let (writer, queue) = JobWriter::new(jobs_root);
        let coordinator = Coordinator::new(store).with_persistence(queue.clone());

        Ok((
            Self {
                config,
                coordinator: Arc::new(coordinator),
                queue,
            },
            writer,
        ))
    }

    /// Run every subsystem until `shutdown` is cancelled:
    /// 1. the background job writer
    /// 2. the periodic dirty flush
    /// 3. the overview log line (if enabled)
    /// 4. the HTTP server (blocking)
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP listener cannot be bound or fails.
    pub async fn run(self, writer: JobWriter, shutdown: CancellationToken) -> Result<()> {
        let writer_handle = tokio::spawn(writer.run());

        let flush_handle = tokio::spawn(run_periodic_flush(
            self.coordinator.clone(),
            self.queue.clone(),
            self.config.save_interval(),
            shutdown.clone(),
        ));

        let overview_handle = (self.config.overview_interval_ms > 0).then(|| {
            tokio::spawn(Self::overview_loop(
                self.coordinator.clone(),
                Duration::from_millis(self.config.overview_interval_ms),
                self.config.client_timeout(),
                shutdown.clone(),
            ))
        });

        tracing::info!(
            listen_addr = %self.config.listen_addr(),
            database = %self.config.database.display(),
            "Starting coordinator"
        );

        let state = ServerState {
            coordinator: self.coordinator.clone(),
            client_timeout: self.config.client_timeout(),
        };
        let result = run_server(self.config.listen_addr(), state, shutdown.clone()).await;

        // Stop the background loops even if the server failed on its own,
        // then let the writer drain: it exits once every queue handle is gone.
        shutdown.cancel();
        if let Err(e) = flush_handle.await {
            tracing::warn!(error = %e, "Flush task ended abnormally");
        }
        if let Some(handle) = overview_handle {
            handle.await.ok();
        }
        drop(self.coordinator);
        drop(self.queue);
        if let Err(e) = writer_handle.await {
            tracing::warn!(error = %e, "Job writer ended abnormally");
        }

        result
    }

    async fn overview_loop(
        coordinator: Arc<Coordinator>,
        interval: Duration,
        client_timeout: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    coordinator.overview(Utc::now(), client_timeout).await.log();
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }
}
