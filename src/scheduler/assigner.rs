use crate::scheduler::job::{Assignment, IndexedTask, Job, TaskStatus};
use crate::scheduler::registry::ClientRecord;
use crate::scheduler::resolver::is_eligible;
use crate::scheduler::store::JobStore;

/// Fill a client's free capacity with pending tasks.
///
/// Jobs are considered in submission order and tasks in definition order.
/// While nothing has been handed out yet in this pass (remaining capacity
/// equals `max_threads`), a `threads_per_task == 0` job may take the whole
/// client, which ends the pass. Jobs with `threads_per_task > 0` are always
/// acceptable and cost that many units each.
///
/// The remaining counter is only checked for `> 0` before each pick, so a
/// pass can hand out more units than the client reported free (e.g. two
/// 3-thread tasks for 4 free threads).
///
/// This is the only place a task moves from `pending` to `assigned`.
pub fn assign(store: &mut JobStore, client: &ClientRecord) -> Vec<Assignment> {
    let mut assignments = Vec::new();
    let max_threads = i64::from(client.max_threads);
    let mut remaining = i64::from(client.free_threads);

    while remaining > 0 {
        let Some((job_index, task_index)) =
            next_pending_task(store.jobs(), remaining == max_threads)
        else {
            break;
        };

        let job = &mut store.jobs_mut()[job_index];
        if job.threads_per_task == 0 {
            remaining = 0;
        } else {
            remaining -= i64::from(job.threads_per_task);
        }

        let task = &mut job.tasks[task_index];
        task.status = TaskStatus::Assigned;
        task.client = Some(client.id.clone());
        let task = task.clone();
        job.refresh_status();

        tracing::info!(
            job_id = %job.id,
            task_index,
            client_id = %client.id,
            remaining,
            "Task assigned"
        );

        assignments.push(Assignment {
            job: job.summary(),
            task: IndexedTask {
                index: task_index,
                task,
            },
        });
    }

    assignments
}

/// Position `(job, task)` of the first pending task acceptable under the
/// current capacity regime, or `None`.
fn next_pending_task(jobs: &[Job], full_capacity: bool) -> Option<(usize, usize)> {
    for (job_index, job) in jobs.iter().enumerate() {
        let acceptable = job.threads_per_task > 0 || full_capacity;
        if !acceptable || !is_eligible(job, jobs) {
            continue;
        }

        if let Some(task_index) = job
            .tasks
            .iter()
            .position(|t| t.status == TaskStatus::Pending)
        {
            return Some((job_index, task_index));
        }
    }
    None
}
