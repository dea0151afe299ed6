use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command as Process, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wait_timeout::ChildExt;

use super::{ExecutionResult, Executor, FailureKind, FAILURE_EXIT_CODE};
use crate::cancel::{is_cancelled, CancelSignal, CANCEL_POLL_INTERVAL};
use crate::recognizer::{Command, CommandKind};
use crate::record::truncate_to_byte_limit;

pub const SHELL_SOURCE: &str = "SHELL";

const DEFAULT_SHELL: &str = "sh";
const DEFAULT_MAX_OUTPUT_BYTES: usize = 100 * 1024;
/// How long to wait for pipes to reach EOF once the shell has exited, and
/// again after killing whatever still holds them.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(400);

/// Runs shell-exec payloads as `sh -c <payload>` subprocesses.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    working_dir: Option<PathBuf>,
    max_output_bytes: usize,
    source: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            working_dir: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            source: SHELL_SOURCE.to_string(),
        }
    }
}

impl ShellExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    #[must_use]
    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    fn spawn(&self, payload: &str) -> std::io::Result<Child> {
        let mut process = Process::new(&self.shell);
        process
            .arg("-c")
            .arg(payload)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(working_dir) = &self.working_dir {
            process.current_dir(working_dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            process.process_group(0);
        }

        process.spawn()
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

impl Executor for ShellExecutor {
    fn source(&self) -> &str {
        &self.source
    }

    fn kind(&self) -> CommandKind {
        CommandKind::ShellExec
    }

    fn execute(&self, command: &Command, deadline: Duration, cancel: &CancelSignal) -> ExecutionResult {
        let started = Instant::now();
        let mut child = match self.spawn(&command.payload) {
            Ok(child) => child,
            Err(error) => {
                return ExecutionResult::failed(
                    command,
                    FailureKind::Application,
                    format!("failed to launch {}: {error}", self.shell),
                    FAILURE_EXIT_CODE,
                    started,
                );
            }
        };
        debug!(pid = child.id(), command = %command.payload, "shell command started");

        let stdout = drain_pipe(child.stdout.take());
        let stderr = drain_pipe(child.stderr.take());

        let outcome = match wait_with_deadline(&mut child, started, deadline, cancel) {
            Ok(outcome) => outcome,
            Err(error) => {
                terminate(&mut child);
                return ExecutionResult::failed(
                    command,
                    FailureKind::Application,
                    format!("failed waiting for shell command: {error}"),
                    FAILURE_EXIT_CODE,
                    started,
                );
            }
        };

        match outcome {
            WaitOutcome::TimedOut => {
                warn!(command = %command.payload, "shell command hit its deadline");
                terminate(&mut child);
                ExecutionResult::timeout(command, deadline, started)
            }
            WaitOutcome::Cancelled => {
                terminate(&mut child);
                ExecutionResult::cancelled(command, started)
            }
            WaitOutcome::Exited(status) => {
                let grace_ends = Instant::now() + PIPE_DRAIN_GRACE;
                if !(stdout.wait_until(grace_ends) && stderr.wait_until(grace_ends)) {
                    debug!(command = %command.payload, "background process holds the output pipes; killing its group");
                    kill_group(&child);
                    let grace_ends = Instant::now() + PIPE_DRAIN_GRACE;
                    stdout.wait_until(grace_ends);
                    stderr.wait_until(grace_ends);
                }
                let stdout = self.collect(&stdout);
                let stderr = self.collect(&stderr);
                let exit_code = status.code().unwrap_or(FAILURE_EXIT_CODE);

                if status.success() {
                    return ExecutionResult::success(command, stdout, exit_code, started);
                }

                let detail = if stderr.is_empty() {
                    format_exit_status(status)
                } else {
                    stderr
                };
                let mut result = ExecutionResult::failed(
                    command,
                    FailureKind::Application,
                    detail,
                    exit_code,
                    started,
                );
                result.output = stdout;
                result
            }
        }
    }
}

impl ShellExecutor {
    fn collect(&self, pipe: &PipeDrain) -> String {
        let bytes = pipe.take();
        let text = String::from_utf8_lossy(&bytes).trim().to_string();
        truncate_to_byte_limit(text, self.max_output_bytes)
    }
}

fn wait_with_deadline(
    child: &mut Child,
    started: Instant,
    deadline: Duration,
    cancel: &CancelSignal,
) -> std::io::Result<WaitOutcome> {
    loop {
        if is_cancelled(cancel) {
            return Ok(WaitOutcome::Cancelled);
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Ok(WaitOutcome::TimedOut);
        }

        if let Some(status) = child.wait_timeout(remaining.min(CANCEL_POLL_INTERVAL))? {
            return Ok(WaitOutcome::Exited(status));
        }
    }
}

/// Output read so far from one child pipe. A reader thread appends chunks as
/// they arrive, so a descendant that keeps the pipe open past the shell's exit
/// cannot hide what was already written.
struct PipeDrain {
    buffer: Arc<Mutex<Vec<u8>>>,
    eof: Receiver<()>,
}

impl PipeDrain {
    /// True once the pipe reached EOF (or was never opened).
    fn wait_until(&self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        !matches!(self.eof.recv_timeout(remaining), Err(mpsc::RecvTimeoutError::Timeout))
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Reads a pipe on its own thread so a chatty child never blocks on a full
/// pipe buffer.
fn drain_pipe(pipe: Option<impl Read + Send + 'static>) -> PipeDrain {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let (sender, eof) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        let sink = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0_u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(read) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..read]),
                    Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
            let _ = sender.send(());
        });
    }
    PipeDrain { buffer, eof }
}

/// Kills the whole process group so grandchildren holding the pipes die too.
fn terminate(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

fn kill_group(child: &Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: signals the process group created at spawn; no memory is shared.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = child;
}

fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}
