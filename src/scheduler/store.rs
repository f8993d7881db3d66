use std::path::Path;

use chrono::Utc;
use uuid::Uuid;

use crate::error::Result;
use crate::persistence::JOB_FILE;
use crate::scheduler::job::{Job, SubmissionAck, TaskStatus};

/// Source of candidate job ids. Candidates may repeat; the store rejects
/// duplicates and asks again.
pub trait JobIdGenerator: Send {
    fn next_id(&mut self) -> String;
}

/// `YYYYMMDD-HHMMSS-mmm-xxxxxxxx`: a sortable timestamp plus a random suffix.
#[derive(Debug, Default)]
pub struct TimestampIdGenerator;

impl JobIdGenerator for TimestampIdGenerator {
    fn next_id(&mut self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S-%3f"), &suffix[..8])
    }
}

/// Authoritative in-memory collection of jobs, kept in submission order.
///
/// Lookups are linear scans; the expected scale is tens to low thousands of jobs.
pub struct JobStore {
    jobs: Vec<Job>,
    ids: Box<dyn JobIdGenerator>,
    dirty: bool,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("jobs", &self.jobs.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self::with_id_generator(Box::new(TimestampIdGenerator))
    }

    pub fn with_id_generator(ids: Box<dyn JobIdGenerator>) -> Self {
        Self {
            jobs: Vec::new(),
            ids,
            dirty: false,
        }
    }

    /// Build a store from jobs that were already persisted. Their ids and
    /// task statuses are kept as they are.
    pub fn from_jobs(jobs: Vec<Job>) -> Self {
        let mut store = Self::new();
        store.jobs = jobs;
        store
    }

    /// Read every `<jobs_root>/<id>/job.json`. Unreadable or unparsable files
    /// are logged and skipped. Loaded jobs are ordered by id, which is
    /// timestamp-prefixed and therefore follows submission order.
    ///
    /// Ids are unique after loading: when two records carry the same id, the
    /// one stored under a directory of that name wins and the other is
    /// skipped with a warning.
    pub async fn load(jobs_root: &Path) -> Result<Self> {
        let mut loaded: Vec<(String, Job)> = Vec::new();
        let mut entries = tokio::fs::read_dir(jobs_root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path().join(JOB_FILE);

            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            }

            let contents = match tokio::fs::read(&path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read job file");
                    continue;
                }
            };

            match serde_json::from_slice::<Job>(&contents) {
                Ok(mut job) => {
                    if job.id.is_empty() {
                        job.id = dir_name.clone();
                    }
                    loaded.push((dir_name, job));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping malformed job file");
                }
            }
        }

        // Within one id, the record whose directory matches sorts first.
        loaded.sort_by(|(a_dir, a), (b_dir, b)| {
            a.id.cmp(&b.id)
                .then_with(|| (*a_dir != a.id).cmp(&(*b_dir != b.id)))
                .then_with(|| a_dir.cmp(b_dir))
        });

        let mut jobs: Vec<Job> = Vec::with_capacity(loaded.len());
        for (dir_name, job) in loaded {
            if jobs.last().is_some_and(|kept| kept.id == job.id) {
                tracing::warn!(job_id = %job.id, dir = %dir_name, "Skipping duplicate job id");
                continue;
            }
            jobs.push(job);
        }

        tracing::info!(count = jobs.len(), root = %jobs_root.display(), "Jobs loaded");
        Ok(Self::from_jobs(jobs))
    }

    /// Insert submitted jobs. Each gets a fresh unique id and is reset to
    /// `pending`. Returns the acknowledgements together with snapshots of the
    /// inserted jobs, in submission order, for the caller to persist.
    pub fn add(&mut self, received: Vec<Job>) -> (Vec<SubmissionAck>, Vec<Job>) {
        let mut acks = Vec::with_capacity(received.len());
        let mut added = Vec::with_capacity(received.len());

        for mut job in received {
            job.id = self.new_job_id();
            job.reset_for_submission();

            tracing::info!(job_id = %job.id, name = %job.name, tasks = job.tasks.len(), "Job added");

            acks.push(SubmissionAck {
                id: job.id.clone(),
                name: job.name.clone(),
                task_count: job.tasks.len(),
            });
            added.push(job.clone());
            self.jobs.push(job);
        }

        (acks, added)
    }

    fn new_job_id(&mut self) -> String {
        loop {
            let candidate = self.ids.next_id();
            if self.find_by_id(&candidate).is_none() {
                return candidate;
            }
            tracing::debug!(candidate = %candidate, "Job id collision, retrying");
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn find_index(&self, id: &str) -> Option<usize> {
        self.jobs.iter().position(|j| j.id == id)
    }

    /// All jobs in submission order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub(crate) fn jobs_mut(&mut self) -> &mut [Job] {
        &mut self.jobs
    }

    /// Overwrite a task's status. Returns `Some(true)` if it changed,
    /// `Some(false)` if it already had that status, `None` if the task is unknown.
    pub fn set_task_status(&mut self, job_id: &str, index: usize, status: TaskStatus) -> Option<bool> {
        let job = self.find_by_id_mut(job_id)?;
        let task = job.tasks.get_mut(index)?;
        if task.status == status {
            return Some(false);
        }
        task.status = status;
        job.refresh_status();
        self.dirty = true;
        Some(true)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// If anything changed since the last call, clear the flag and return a
    /// copy of every job for writing to disk.
    pub fn take_dirty_snapshot(&mut self) -> Option<Vec<Job>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.jobs.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
