use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::remote::CoordinatorClient;
use crate::scheduler::Assignment;

use super::executor::{TaskEvent, TaskExecutor, TaskHandle};
use super::queue::LocalQueue;
use super::tasklog::TaskLog;

/// A worker client: polls the coordinator, starts the tasks it is handed and
/// reports their outcome on the next poll.
pub struct Worker {
    queue: Arc<Mutex<LocalQueue>>,
    executor: TaskExecutor,
    log: TaskLog,
    remote: CoordinatorClient,
}

impl Worker {
    /// `config` must already be resolved (non-zero `max_threads`, hostname set).
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            queue: Arc::new(Mutex::new(LocalQueue::new(
                config.hostname.clone(),
                config.max_threads,
            ))),
            executor: TaskExecutor::new(),
            log: TaskLog::new(config.temp_dir.clone()),
            remote: CoordinatorClient::new(config.server.clone())?,
        })
    }

    pub fn queue(&self) -> Arc<Mutex<LocalQueue>> {
        self.queue.clone()
    }

    pub fn server(&self) -> &str {
        self.remote.base_url()
    }

    /// One round trip: report local state, apply the reply, start whatever
    /// can start.
    pub async fn poll_once(&self) -> Result<()> {
        let report = self.queue.lock().await.report();
        let reply = self.remote.update(&report).await?;

        let new_tasks = reply.new_tasks.len();
        let removed = reply.tasks_to_remove.len();
        {
            let mut queue = self.queue.lock().await;
            let first_contact = queue.id.is_empty();
            queue.apply_response(reply);
            if first_contact {
                tracing::info!(client_id = %queue.id, ip = %queue.ip, port = queue.port, "Registered with coordinator");
            }
        }
        if new_tasks > 0 || removed > 0 {
            tracing::info!(new_tasks, removed, "Applied coordinator update");
        }

        self.start_pending().await;
        Ok(())
    }

    /// Start tasks until none is startable. Returns how many were started.
    pub async fn start_pending(&self) -> usize {
        let mut started = 0;
        loop {
            let next = {
                let queue = self.queue.lock().await;
                queue
                    .next_startable()
                    .and_then(|(job_id, index)| queue.get(&job_id, index).cloned())
            };
            let Some(assignment) = next else {
                break;
            };
            if self.start(assignment).await {
                started += 1;
            }
        }
        started
    }

    async fn start(&self, assignment: Assignment) -> bool {
        let job_id = assignment.job.id.clone();
        let index = assignment.task.index;
        let task = &assignment.task.task;
        let cwd = LocalQueue::working_dir(self.log.temp_dir(), &assignment);

        if let Err(e) = tokio::fs::create_dir_all(self.log.job_dir(&job_id)).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to create job directory");
        }

        let command_line = TaskExecutor::command_line(&task.call, &task.args);

        match self.executor.spawn(&task.call, &task.args, &cwd) {
            Ok(handle) => {
                // Recorded before the supervisor starts so it precedes any output.
                self.log
                    .record(&job_id, index, &format!("[CLIENT] STARTING TASK: {}", command_line))
                    .await;
                self.queue.lock().await.mark_started(&job_id, index);
                tracing::info!(
                    job_id = %job_id,
                    task_index = index,
                    pid = ?handle.pid,
                    command = %command_line,
                    "Task started"
                );
                tokio::spawn(supervise(
                    self.queue.clone(),
                    self.log.clone(),
                    job_id,
                    index,
                    handle,
                ));
                true
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, task_index = index, error = %e, "Task failed to start");
                self.log
                    .record(&job_id, index, &format!("[CLIENT] ERROR: {}", e))
                    .await;
                self.queue.lock().await.mark_spawn_failed(&job_id, index);
                false
            }
        }
    }
}

/// Forward a task's output to its log and record its exit in the queue.
async fn supervise(
    queue: Arc<Mutex<LocalQueue>>,
    log: TaskLog,
    job_id: String,
    index: usize,
    mut handle: TaskHandle,
) {
    let started = Instant::now();
    while let Some(event) = handle.events.recv().await {
        match event {
            TaskEvent::Output(line) => log.record(&job_id, index, &line).await,
            TaskEvent::Exited(code) => {
                let elapsed = started.elapsed().as_secs_f64();
                log.record(
                    &job_id,
                    index,
                    &format!("[CLIENT] TASK ENDED WITH CODE {}. Duration: {:.1}s", code, elapsed),
                )
                .await;

                if let Some(status) = queue.lock().await.finish(&job_id, index, code) {
                    tracing::info!(
                        job_id = %job_id,
                        task_index = index,
                        exit_code = code,
                        status = %status,
                        duration_secs = elapsed,
                        "Task finished"
                    );
                }
            }
        }
    }
}
