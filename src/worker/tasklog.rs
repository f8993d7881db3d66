use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Per-task log files under `<temp>/<job id>/log_<job id>-<index>.txt`.
#[derive(Debug, Clone)]
pub struct TaskLog {
    temp_dir: PathBuf,
}

impl TaskLog {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// The job's cache directory.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.temp_dir.join(job_id)
    }

    pub fn path(&self, job_id: &str, index: usize) -> PathBuf {
        self.job_dir(job_id)
            .join(format!("log_{}-{}.txt", job_id, index))
    }

    /// Append one timestamped line.
    pub async fn append(&self, job_id: &str, index: usize, line: &str) -> Result<()> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut entry = format!("{} {}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"), line);
        if !entry.ends_with('\n') {
            entry.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(job_id, index))
            .await?;
        file.write_all(entry.as_bytes()).await?;
        Ok(())
    }

    /// Like [`TaskLog::append`], but failures are only logged.
    pub async fn record(&self, job_id: &str, index: usize, line: &str) {
        if let Err(e) = self.append(job_id, index, line).await {
            tracing::warn!(job_id, task_index = index, error = %e, "Failed to write task log");
        }
    }
}
