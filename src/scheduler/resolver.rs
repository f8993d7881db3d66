//! Tag-based dependency resolution.
//!
//! A job is eligible when, for each tag it depends on, every other job
//! carrying that tag has all of its tasks `completed`. A tag no job carries
//! blocks nothing: submitting a job whose dependency is misspelled makes it
//! immediately runnable.

use crate::scheduler::job::Job;

/// Returns true when all of `job`'s dependency tags are satisfied by `jobs`.
///
/// `job` itself is skipped when it appears in `jobs`, so a job that both
/// carries and depends on a tag does not wait on itself.
pub fn is_eligible(job: &Job, jobs: &[Job]) -> bool {
    job.dependencies.iter().all(|tag| {
        jobs.iter()
            .filter(|other| !std::ptr::eq(*other, job))
            .filter(|other| other.tags.contains(tag))
            .all(Job::is_fully_completed)
    })
}

/// Jobs currently blocking `tag`, i.e. carrying it without being fully completed.
pub fn blocking_jobs<'a>(tag: &'a str, jobs: &'a [Job]) -> impl Iterator<Item = &'a Job> + 'a {
    jobs.iter()
        .filter(move |j| j.tags.contains(tag) && !j.is_fully_completed())
}
