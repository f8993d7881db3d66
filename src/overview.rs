use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::resolver::blocking_jobs;
use crate::scheduler::{ClientRegistry, JobStatus, JobStore, TaskStatus};

/// Operator snapshot of the farm: counters, per-job progress and client liveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub generated_at: DateTime<Utc>,
    pub job_count: usize,
    pub tasks: TaskCounts,
    pub jobs: Vec<JobLine>,
    pub clients: Vec<ClientLine>,
}

/// `pending` includes assigned and working tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub error: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLine {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub task_count: usize,
    pub completed: usize,
    pub error: usize,
    pub threads_per_task: u32,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    /// Ids of jobs this one is currently waiting on.
    pub blocked_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientLine {
    pub id: String,
    pub free_threads: u32,
    pub max_threads: u32,
    pub last_alive: DateTime<Utc>,
    pub stale: bool,
}

impl Overview {
    pub fn collect(
        store: &JobStore,
        registry: &ClientRegistry,
        now: DateTime<Utc>,
        client_timeout: Duration,
    ) -> Self {
        let all = store.jobs();
        let mut tasks = TaskCounts::default();

        let jobs = all
            .iter()
            .map(|job| {
                let completed = job.count_tasks(TaskStatus::Completed);
                let error = job.count_tasks(TaskStatus::Error);
                tasks.total += job.tasks.len();
                tasks.completed += completed;
                tasks.error += error;
                tasks.pending += job.tasks.len() - completed - error;

                let mut blocked_by: Vec<String> = job
                    .dependencies
                    .iter()
                    .flat_map(|tag| blocking_jobs(tag, all))
                    .filter(|other| other.id != job.id)
                    .map(|other| other.id.clone())
                    .collect();
                blocked_by.sort();
                blocked_by.dedup();

                JobLine {
                    id: job.id.clone(),
                    name: job.name.clone(),
                    status: job.status,
                    task_count: job.tasks.len(),
                    completed,
                    error,
                    threads_per_task: job.threads_per_task,
                    tags: job.tags.iter().cloned().collect(),
                    dependencies: job.dependencies.iter().cloned().collect(),
                    blocked_by,
                }
            })
            .collect();

        let clients = registry
            .all_clients()
            .into_iter()
            .map(|c| ClientLine {
                id: c.id.clone(),
                free_threads: c.free_threads,
                max_threads: c.max_threads,
                last_alive: c.last_alive,
                stale: !c.is_alive(now, client_timeout),
            })
            .collect();

        Self {
            generated_at: now,
            job_count: all.len(),
            tasks,
            jobs,
            clients,
        }
    }

    /// Emit the counters as one log line.
    pub fn log(&self) {
        let stale = self.clients.iter().filter(|c| c.stale).count();
        tracing::info!(
            jobs = self.job_count,
            tasks = self.tasks.total,
            pending = self.tasks.pending,
            completed = self.tasks.completed,
            error = self.tasks.error,
            clients = self.clients.len(),
            stale_clients = stale,
            "Farm overview"
        );
    }
}
