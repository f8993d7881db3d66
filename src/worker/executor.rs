use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;

use crate::error::{FarmError, Result};

/// Exit code reported when a process ends without one (killed by a signal,
/// or its supervisor went away).
pub const NO_EXIT_CODE: i32 = -1;

/// Consecutive read failures after which a task's output is abandoned.
const MAX_READ_ERRORS: u32 = 8;

/// Decode one raw output line. Invalid UTF-8 becomes U+FFFD and a trailing
/// carriage return is dropped.
fn decode_line(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8_lossy(&raw).into_owned()
}

/// What a running task emits: any number of output lines, then exactly one exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Output(String),
    Exited(i32),
}

/// One-shot latch: only the first [`CompletionLatch::fire`] returns true.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    fired: AtomicBool,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::AcqRel)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Sends the terminal event for one task. Whichever of the normal exit path
/// and teardown (drop) gets there first wins; the other is a no-op.
struct ExitSignal {
    latch: Arc<CompletionLatch>,
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl ExitSignal {
    fn exit(&self, code: i32) {
        if self.latch.fire() {
            self.tx.send(TaskEvent::Exited(code)).ok();
        }
    }
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.exit(NO_EXIT_CODE);
    }
}

/// Events from a spawned task.
#[derive(Debug)]
pub struct TaskHandle {
    pub pid: Option<u32>,
    pub events: mpsc::UnboundedReceiver<TaskEvent>,
}

impl TaskHandle {
    /// Drain events until the exit, returning the collected output and the code.
    pub async fn wait(mut self) -> (Vec<String>, i32) {
        let mut output = Vec::new();
        while let Some(event) = self.events.recv().await {
            match event {
                TaskEvent::Output(line) => output.push(line),
                TaskEvent::Exited(code) => return (output, code),
            }
        }
        (output, NO_EXIT_CODE)
    }
}

/// Runs task commands as shell invocations.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    shell: String,
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// The command line a task runs: `call` followed by its arguments.
    pub fn command_line(call: &str, args: &[String]) -> String {
        std::iter::once(call)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Start `call args...` in `cwd`. Stdout and stderr lines are forwarded as
    /// [`TaskEvent::Output`]; the exit code follows once both streams close.
    ///
    /// # Errors
    ///
    /// [`FarmError::Spawn`] if the process cannot be started (e.g. `cwd`
    /// does not exist).
    pub fn spawn(&self, call: &str, args: &[String], cwd: &Path) -> Result<TaskHandle> {
        let command_line = Self::command_line(call, args);

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&command_line)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FarmError::Spawn(format!("{}: {}", command_line, e)))?;

        let pid = child.id();
        let (tx, rx) = mpsc::unbounded_channel();
        let signal = ExitSignal {
            latch: Arc::new(CompletionLatch::new()),
            tx: tx.clone(),
        };

        tracing::debug!(pid = ?pid, command = %command_line, cwd = %cwd.display(), "Task spawned");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tokio::spawn(async move {
            if let (Some(stdout), Some(stderr)) = (stdout, stderr) {
                let mut lines = SplitStream::new(BufReader::new(stdout).split(b'\n'))
                    .merge(SplitStream::new(BufReader::new(stderr).split(b'\n')));

                // Keep reading until both pipes hit EOF so the child never
                // blocks on a full pipe or dies of SIGPIPE.
                let mut errors = 0;
                while let Some(line) = lines.next().await {
                    match line {
                        Ok(raw) => {
                            errors = 0;
                            tx.send(TaskEvent::Output(decode_line(raw))).ok();
                        }
                        Err(e) => {
                            errors += 1;
                            tracing::warn!(pid = ?pid, error = %e, "Failed to read task output");
                            if errors >= MAX_READ_ERRORS {
                                break;
                            }
                        }
                    }
                }
            }

            match child.wait().await {
                Ok(status) => signal.exit(status.code().unwrap_or(NO_EXIT_CODE)),
                Err(e) => {
                    tracing::warn!(pid = ?pid, error = %e, "Failed to wait for task");
                    signal.exit(NO_EXIT_CODE);
                }
            }
        });

        Ok(TaskHandle { pid, events: rx })
    }
}
