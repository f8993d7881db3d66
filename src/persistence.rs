//! Best-effort job persistence.
//!
//! Writes never block request handling: snapshots are queued to a single
//! background writer, which logs failures and moves on. The in-memory store
//! stays authoritative; a crash before a write lands can lose that change.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::scheduler::Job;

pub const JOB_FILE: &str = "job.json";

/// Path of a job's persisted record under `jobs_root`.
pub fn job_file(jobs_root: &Path, job_id: &str) -> PathBuf {
    jobs_root.join(job_id).join(JOB_FILE)
}

/// Write one job to `<jobs_root>/<id>/job.json`, creating the directory.
///
/// The record is written to a sibling temp file and renamed into place, so
/// `job.json` always holds either the previous or the new snapshot.
pub async fn write_job(jobs_root: &Path, job: &Job) -> Result<()> {
    let path = job_file(jobs_root, &job.id);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let json = serde_json::to_vec_pretty(job)?;
    let temp_path = path.with_extension("json.tmp");
    tokio::fs::write(&temp_path, json).await?;
    tokio::fs::rename(&temp_path, &path).await?;
    Ok(())
}

/// Sending half of the background writer.
#[derive(Debug, Clone)]
pub struct PersistQueue {
    tx: mpsc::UnboundedSender<Vec<Job>>,
}

impl PersistQueue {
    /// Queue jobs for writing. Never waits; if the writer is gone the jobs
    /// are dropped with a warning.
    pub fn enqueue(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        if let Err(e) = self.tx.send(jobs) {
            tracing::warn!(jobs = e.0.len(), "Job writer stopped, snapshot dropped");
        }
    }
}

/// Background task that writes queued job snapshots in arrival order.
pub struct JobWriter {
    jobs_root: PathBuf,
    rx: mpsc::UnboundedReceiver<Vec<Job>>,
}

impl JobWriter {
    pub fn new(jobs_root: PathBuf) -> (Self, PersistQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { jobs_root, rx }, PersistQueue { tx })
    }

    /// Start the writer. It exits once every [`PersistQueue`] is dropped and
    /// the backlog is written.
    pub fn spawn(jobs_root: PathBuf) -> (PersistQueue, JoinHandle<()>) {
        let (writer, queue) = Self::new(jobs_root);
        (queue, tokio::spawn(writer.run()))
    }

    pub async fn run(mut self) {
        while let Some(jobs) = self.rx.recv().await {
            for job in &jobs {
                if let Err(e) = write_job(&self.jobs_root, job).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to persist job");
                }
            }
            tracing::debug!(count = jobs.len(), "Jobs persisted");
        }
    }
}

/// Every `interval`, queue a snapshot of all jobs if the store changed.
/// The snapshot is taken under the coordinator lock; the write is not.
pub async fn run_periodic_flush(
    coordinator: Arc<Coordinator>,
    queue: PersistQueue,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(jobs) = coordinator.take_dirty_snapshot().await {
                    queue.enqueue(jobs);
                }
            }
            _ = shutdown.cancelled() => {
                if let Some(jobs) = coordinator.take_dirty_snapshot().await {
                    queue.enqueue(jobs);
                }
                tracing::info!("Periodic flush stopped");
                break;
            }
        }
    }
}
