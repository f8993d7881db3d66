use std::path::{Path, PathBuf};

use crate::protocol::UpdateReply;
use crate::scheduler::{Assignment, ClientReport, TaskStatus};

/// The client's own list of tasks and its capacity accounting.
///
/// Free capacity is tracked locally and reported as-is; the coordinator
/// trusts it.
#[derive(Debug, Clone)]
pub struct LocalQueue {
    pub hostname: String,
    /// Assigned by the coordinator on first contact.
    pub id: String,
    pub ip: String,
    pub port: u16,
    pub ip_family: String,
    pub max_threads: u32,
    pub free_threads: u32,
    tasks: Vec<Assignment>,
}

impl LocalQueue {
    pub fn new(hostname: impl Into<String>, max_threads: u32) -> Self {
        Self {
            hostname: hostname.into(),
            id: String::new(),
            ip: String::new(),
            port: 0,
            ip_family: String::new(),
            max_threads,
            free_threads: max_threads,
            tasks: Vec::new(),
        }
    }

    pub fn tasks(&self) -> &[Assignment] {
        &self.tasks
    }

    pub fn get(&self, job_id: &str, index: usize) -> Option<&Assignment> {
        self.tasks
            .iter()
            .find(|a| a.job.id == job_id && a.task.index == index)
    }

    fn get_mut(&mut self, job_id: &str, index: usize) -> Option<&mut Assignment> {
        self.tasks
            .iter_mut()
            .find(|a| a.job.id == job_id && a.task.index == index)
    }

    /// Tasks not yet completed or failed.
    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|a| !a.task.task.status.is_terminal())
            .count()
    }

    /// The `client-update` payload for the next poll.
    pub fn report(&self) -> ClientReport {
        ClientReport {
            hostname: self.hostname.clone(),
            id: self.id.clone(),
            max_threads: self.max_threads,
            free_threads: self.free_threads,
            tasks: self.tasks.iter().map(Assignment::task_ref).collect(),
        }
    }

    /// Adopt the coordinator's view of this client, forget the tasks it
    /// says are done, and queue the new ones.
    pub fn apply_response(&mut self, reply: UpdateReply) {
        self.id = reply.client.id;
        self.ip = reply.client.ip;
        self.port = reply.client.port;
        self.ip_family = reply.client.ip_family;

        self.tasks.retain(|a| {
            !reply
                .tasks_to_remove
                .iter()
                .any(|r| r.matches(&a.job.id, a.task.index))
        });
        self.tasks.extend(reply.new_tasks);
    }

    /// Capacity units a task of this assignment's job occupies while running.
    pub fn usage(&self, assignment: &Assignment) -> u32 {
        if assignment.job.threads_per_task == 0 {
            self.max_threads
        } else {
            assignment.job.threads_per_task
        }
    }

    /// The next task that may start now, as `(job id, task index)`.
    ///
    /// A monopolizing job (`threads_per_task == 0`) starts only on an idle
    /// client; any other job starts regardless of free capacity.
    pub fn next_startable(&self) -> Option<(String, usize)> {
        self.tasks
            .iter()
            .filter(|a| matches!(a.task.task.status, TaskStatus::Pending | TaskStatus::Assigned))
            .find(|a| {
                a.job.threads_per_task > 0 || self.free_threads == self.max_threads
            })
            .map(|a| (a.job.id.clone(), a.task.index))
    }

    /// Mark a task as running and take its capacity.
    pub fn mark_started(&mut self, job_id: &str, index: usize) -> bool {
        let Some(usage) = self.get(job_id, index).map(|a| self.usage(a)) else {
            return false;
        };
        if let Some(task) = self.get_mut(job_id, index) {
            task.task.task.status = TaskStatus::Working;
        }
        self.free_threads = self.free_threads.saturating_sub(usage);
        true
    }

    /// The process could not be started. The task is reported as `error`
    /// and never retried; no capacity was taken.
    pub fn mark_spawn_failed(&mut self, job_id: &str, index: usize) {
        if let Some(task) = self.get_mut(job_id, index) {
            task.task.task.status = TaskStatus::Error;
        }
    }

    /// Record a task's exit. Returns the new status, or `None` if the task
    /// is unknown or already finished, so repeated exit notifications only
    /// count once.
    pub fn finish(&mut self, job_id: &str, index: usize, exit_code: i32) -> Option<TaskStatus> {
        let usage = self.get(job_id, index).map(|a| self.usage(a))?;
        let task = self.get_mut(job_id, index)?;
        if task.task.task.status.is_terminal() {
            return None;
        }

        let status = TaskStatus::from_exit_code(exit_code);
        task.task.task.status = status;
        self.free_threads = self.free_threads.saturating_add(usage).min(self.max_threads);
        Some(status)
    }

    /// Directory a task runs in: the job's `working_dir`, or its cache
    /// directory under `temp_dir`.
    pub fn working_dir(temp_dir: &Path, assignment: &Assignment) -> PathBuf {
        match &assignment.job.working_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => temp_dir.join(&assignment.job.id),
        }
    }
}
