use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

/// Treats an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Lifecycle of a single task: `pending -> assigned -> working -> {completed | error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Assigned,
    Working,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    /// Maps a process exit code to the terminal status it produces.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            TaskStatus::Completed
        } else {
            TaskStatus::Error
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::Working => write!(f, "working"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Error => write!(f, "error"),
        }
    }
}

/// Aggregate status of a job, derived from its tasks. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Working,
    Completed,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Working => write!(f, "working"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// A single external-process invocation belonging to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub call: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: TaskStatus,
    /// Client currently owning the task. Set by the scheduler on assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

impl Task {
    pub fn new(name: impl Into<String>, call: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            call: call.into(),
            args,
            status: TaskStatus::Pending,
            client: None,
        }
    }
}

/// A named unit of work. This is both the submission format and the on-disk
/// `job.json` format; missing optional fields are filled with defaults when
/// deserializing, which makes normalization identical for both sources.
/// An explicit `null` counts as missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Assigned by the coordinator. Anything a submitter sends here is replaced.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: JobStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeSet<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependencies: BTreeSet<String>,
    /// `0` monopolizes a client; `n > 0` costs `n` capacity units per task.
    #[serde(default, deserialize_with = "null_as_default")]
    pub threads_per_task: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<Task>,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            status: JobStatus::Pending,
            tags: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            threads_per_task: 0,
            working_dir: None,
            tasks: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_dependency(mut self, tag: impl Into<String>) -> Self {
        self.dependencies.insert(tag.into());
        self
    }

    pub fn with_threads_per_task(mut self, threads: u32) -> Self {
        self.threads_per_task = threads;
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn count_tasks(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// True when every task has completed. A job without tasks is trivially complete.
    pub fn is_fully_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    /// Resets the job to a freshly submitted state.
    pub fn reset_for_submission(&mut self) {
        self.status = JobStatus::Pending;
        for task in &mut self.tasks {
            task.status = TaskStatus::Pending;
            task.client = None;
        }
    }

    /// Recompute `status` from the task statuses.
    pub fn refresh_status(&mut self) {
        let total = self.tasks.len();
        let completed = self.count_tasks(TaskStatus::Completed);
        let errors = self.count_tasks(TaskStatus::Error);
        let active = self
            .tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Assigned | TaskStatus::Working))
            .count();

        self.status = if total > 0 && completed == total {
            JobStatus::Completed
        } else if errors > 0 && active == 0 && errors + completed == total {
            JobStatus::Error
        } else if active > 0 || completed + errors > 0 {
            JobStatus::Working
        } else {
            JobStatus::Pending
        };
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            threads_per_task: self.threads_per_task,
            working_dir: self.working_dir.clone(),
        }
    }
}

/// Denormalized job fields that travel with every assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub threads_per_task: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// A task snapshot tagged with its position in the parent job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedTask {
    pub index: usize,
    #[serde(flatten)]
    pub task: Task,
}

/// One unit of work handed to a client. The coordinator does not keep this
/// projection; it only lives on the wire and in the client's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub job: JobSummary,
    pub task: IndexedTask,
}

impl Assignment {
    pub fn task_ref(&self) -> TaskRef {
        TaskRef {
            job: JobRef {
                id: self.job.id.clone(),
            },
            task: TaskStatusRef {
                index: self.task.index,
                status: self.task.task.status,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusRef {
    pub index: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: TaskStatus,
}

/// The minimal view of a client-held task: which task it is and what the
/// client observed. Client reports carry full assignments; every extra field
/// is ignored when parsing into this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub job: JobRef,
    pub task: TaskStatusRef,
}

impl TaskRef {
    pub fn new(job_id: impl Into<String>, index: usize, status: TaskStatus) -> Self {
        Self {
            job: JobRef { id: job_id.into() },
            task: TaskStatusRef { index, status },
        }
    }

    pub fn matches(&self, job_id: &str, index: usize) -> bool {
        self.job.id == job_id && self.task.index == index
    }
}

/// Per-job acknowledgement returned by a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionAck {
    pub id: String,
    pub name: String,
    pub task_count: usize,
}
