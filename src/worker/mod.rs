//! Worker client: runs the tasks a coordinator hands out.
//!
//! - [`LocalQueue`]: the client's task list and free-capacity bookkeeping
//! - [`TaskExecutor`]: spawns `sh -c <call args...>` and streams its output
//! - [`TaskLog`]: per-task log files under the temp directory
//! - [`Worker`] and [`UpdatePoller`]: the poll / start / report loop
//!
//! # Execution Flow
//!
//! 1. The poller sends the local task list as a `client-update`
//! 2. The reply's finished tasks are dropped and new ones queued
//! 3. Startable tasks are spawned; each one's output goes to its log file
//! 4. On exit the task becomes `completed` (code 0) or `error` and its
//!    capacity is released, to be reported on the next poll
//!
//! Commands run through the shell without sandboxing.

pub mod executor;
pub mod poller;
pub mod queue;
pub mod runner;
pub mod tasklog;

pub use executor::{TaskEvent, TaskExecutor};
pub use poller::UpdatePoller;
pub use queue::LocalQueue;
pub use runner::Worker;
pub use tasklog::TaskLog;
