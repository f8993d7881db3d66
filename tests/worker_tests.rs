use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::Utc;

use taskfarm::protocol::UpdateReply;
use taskfarm::scheduler::job::IndexedTask;
use taskfarm::scheduler::{Assignment, ClientRecord, ClientReport, Job, Task, TaskRef, TaskStatus};
use taskfarm::worker::LocalQueue;

fn assignment(job_id: &str, index: usize, threads_per_task: u32) -> Assignment {
    let mut job = Job::new("job").with_threads_per_task(threads_per_task);
    job.id = job_id.to_string();
    let mut task = Task::new(format!("t{}", index), "true", vec![]);
    task.status = TaskStatus::Assigned;
    Assignment {
        job: job.summary(),
        task: IndexedTask { index, task },
    }
}

fn reply(new_tasks: Vec<Assignment>, tasks_to_remove: Vec<TaskRef>) -> UpdateReply {
    let report = ClientReport {
        hostname: "box".to_string(),
        max_threads: 4,
        free_threads: 4,
        ..Default::default()
    };
    let peer: SocketAddr = "192.168.1.10:50000".parse().unwrap();
    UpdateReply {
        client: ClientRecord::register(&report, peer, Utc::now()),
        new_tasks,
        tasks_to_remove,
    }
}

#[test]
fn test_apply_response_adopts_identity_and_tasks() {
    let mut queue = LocalQueue::new("box", 4);
    queue.apply_response(reply(vec![assignment("j1", 0, 1), assignment("j1", 1, 1)], vec![]));

    assert_eq!(queue.id, "box-192.168.1.10:50000");
    assert_eq!(queue.ip, "192.168.1.10");
    assert_eq!(queue.port, 50000);
    assert_eq!(queue.tasks().len(), 2);

    let report = queue.report();
    assert_eq!(report.id, queue.id);
    assert_eq!(report.free_threads, 4);
    assert_eq!(report.tasks[1], TaskRef::new("j1", 1, TaskStatus::Assigned));
}

#[test]
fn test_proportional_tasks_take_capacity() {
    let mut queue = LocalQueue::new("box", 4);
    queue.apply_response(reply(vec![assignment("j1", 0, 3), assignment("j1", 1, 3)], vec![]));

    let (job, index) = queue.next_startable().unwrap();
    assert!(queue.mark_started(&job, index));
    assert_eq!(queue.free_threads, 1);

    // Non-monopolizing tasks start even past the free count.
    let (job, index) = queue.next_startable().unwrap();
    assert_eq!(index, 1);
    queue.mark_started(&job, index);
    assert_eq!(queue.free_threads, 0);
    assert!(queue.next_startable().is_none());

    assert_eq!(queue.finish("j1", 0, 0), Some(TaskStatus::Completed));
    assert_eq!(queue.free_threads, 3);
}

#[test]
fn test_monopolizing_task_waits_for_idle_client() {
    let mut queue = LocalQueue::new("box", 4);
    queue.apply_response(reply(vec![assignment("p", 0, 1), assignment("m", 0, 0)], vec![]));

    let (job, index) = queue.next_startable().unwrap();
    assert_eq!(job, "p");
    queue.mark_started(&job, index);
    assert!(queue.next_startable().is_none());

    queue.finish("p", 0, 0);
    let (job, index) = queue.next_startable().unwrap();
    assert_eq!(job, "m");
    queue.mark_started(&job, index);
    assert_eq!(queue.free_threads, 0);

    queue.finish("m", 0, 1);
    assert_eq!(queue.free_threads, 4);
    assert_eq!(queue.get("m", 0).unwrap().task.task.status, TaskStatus::Error);
}

#[test]
fn test_finish_is_idempotent() {
    let mut queue = LocalQueue::new("box", 4);
    queue.apply_response(reply(vec![assignment("j1", 0, 2), assignment("j1", 1, 2)], vec![]));
    queue.mark_started("j1", 0);
    queue.mark_started("j1", 1);
    assert_eq!(queue.free_threads, 0);

    assert_eq!(queue.finish("j1", 0, 0), Some(TaskStatus::Completed));
    assert_eq!(queue.finish("j1", 0, 0), None);
    assert_eq!(queue.finish("j1", 0, 2), None);
    assert_eq!(queue.free_threads, 2);
    assert_eq!(queue.get("j1", 0).unwrap().task.task.status, TaskStatus::Completed);

    assert_eq!(queue.finish("unknown", 0, 0), None);
}

#[test]
fn test_spawn_failure_marks_error_without_taking_capacity() {
    let mut queue = LocalQueue::new("box", 4);
    queue.apply_response(reply(vec![assignment("j1", 0, 1)], vec![]));

    queue.mark_spawn_failed("j1", 0);

    assert_eq!(queue.free_threads, 4);
    assert!(queue.next_startable().is_none());
    assert_eq!(queue.report().tasks[0].task.status, TaskStatus::Error);
    assert_eq!(queue.active_count(), 0);
}

#[test]
fn test_removed_tasks_are_forgotten() {
    let mut queue = LocalQueue::new("box", 4);
    queue.apply_response(reply(vec![assignment("j1", 0, 1), assignment("j1", 1, 1)], vec![]));
    queue.mark_started("j1", 0);
    queue.finish("j1", 0, 0);

    queue.apply_response(reply(
        vec![assignment("j2", 0, 1)],
        vec![TaskRef::new("j1", 0, TaskStatus::Completed)],
    ));

    let remaining: Vec<(String, usize)> = queue
        .tasks()
        .iter()
        .map(|a| (a.job.id.clone(), a.task.index))
        .collect();
    assert_eq!(remaining, vec![("j1".to_string(), 1), ("j2".to_string(), 0)]);
}

#[test]
fn test_working_dir_defaults_to_job_cache() {
    let temp = Path::new("/tmp/farm");
    let mut a = assignment("j1", 0, 1);
    assert_eq!(LocalQueue::working_dir(temp, &a), PathBuf::from("/tmp/farm/j1"));

    a.job.working_dir = Some(PathBuf::from("/srv/project"));
    assert_eq!(LocalQueue::working_dir(temp, &a), PathBuf::from("/srv/project"));
}
