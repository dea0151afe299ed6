//! Executors turn a [`Command`] into an [`ExecutionResult`] within a deadline.

mod remote;
mod shell;

use std::time::{Duration, Instant};

use crate::cancel::CancelSignal;
use crate::recognizer::{Command, CommandKind};

pub use remote::{RemoteCallExecutor, RemoteInitError, REMOTE_SOURCE};
pub use shell::{ShellExecutor, SHELL_SOURCE};

/// Exit code recorded for failures that have no process exit status.
pub const FAILURE_EXIT_CODE: i32 = -1;

/// Why an execution did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The deadline expired before the executor finished.
    Timeout,
    /// Connection-level failure; the request may never have been answered.
    Transport,
    /// A well-formed negative answer: non-zero exit or an error response.
    Application,
    /// The executor could not make sense of the command or the response.
    Malformed,
    /// Rejected by the safety denylist before execution.
    Blocked,
    /// Shutdown interrupted the execution.
    Cancelled,
}

impl FailureKind {
    /// Failures worth another attempt.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::Transport)
    }
}

/// Outcome of executing one command. Created once, then written to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub command_id: Option<String>,
    pub kind: CommandKind,
    pub failure: Option<FailureKind>,
    /// Standard output, or the assistant message for remote calls.
    pub output: String,
    /// Standard error, timeout description, or raw error response.
    pub error_detail: String,
    /// Process exit code; remote calls use 0 for success and -1 for failure.
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Executor invocations spent on this result.
    pub attempts: u32,
}

impl ExecutionResult {
    #[must_use]
    pub fn success(command: &Command, output: impl Into<String>, exit_code: i32, started: Instant) -> Self {
        Self {
            command_id: command.id.clone(),
            kind: command.kind,
            failure: None,
            output: output.into(),
            error_detail: String::new(),
            exit_code,
            duration_ms: elapsed_ms(started),
            attempts: 1,
        }
    }

    #[must_use]
    pub fn failed(
        command: &Command,
        failure: FailureKind,
        error_detail: impl Into<String>,
        exit_code: i32,
        started: Instant,
    ) -> Self {
        Self {
            command_id: command.id.clone(),
            kind: command.kind,
            failure: Some(failure),
            output: String::new(),
            error_detail: error_detail.into(),
            exit_code,
            duration_ms: elapsed_ms(started),
            attempts: 1,
        }
    }

    #[must_use]
    pub fn timeout(command: &Command, deadline: Duration, started: Instant) -> Self {
        Self::failed(
            command,
            FailureKind::Timeout,
            format!("timeout after {}", format_deadline(deadline)),
            FAILURE_EXIT_CODE,
            started,
        )
    }

    #[must_use]
    pub fn blocked(command: &Command, pattern: &str) -> Self {
        Self::failed(
            command,
            FailureKind::Blocked,
            format!("blocked by denylist entry '{pattern}'"),
            FAILURE_EXIT_CODE,
            Instant::now(),
        )
    }

    #[must_use]
    pub fn cancelled(command: &Command, started: Instant) -> Self {
        Self::failed(
            command,
            FailureKind::Cancelled,
            "cancelled before completion",
            FAILURE_EXIT_CODE,
            started,
        )
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    #[must_use]
    pub fn is_transient_failure(&self) -> bool {
        self.failure.is_some_and(FailureKind::is_transient)
    }
}

/// Something that can run commands of one kind.
pub trait Executor: Send + Sync {
    /// Label written as `[<SOURCE>]` on result records.
    fn source(&self) -> &str;

    fn kind(&self) -> CommandKind;

    /// Runs `command`, returning within `deadline` (plus a small overshoot for
    /// teardown). Never panics on command failure; failures are results.
    fn execute(&self, command: &Command, deadline: Duration, cancel: &CancelSignal) -> ExecutionResult;
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn source(&self) -> &str {
        (**self).source()
    }

    fn kind(&self) -> CommandKind {
        (**self).kind()
    }

    fn execute(&self, command: &Command, deadline: Duration, cancel: &CancelSignal) -> ExecutionResult {
        (**self).execute(command, deadline, cancel)
    }
}

/// `30s` for whole seconds, `1500ms` otherwise.
#[must_use]
pub fn format_deadline(deadline: Duration) -> String {
    if deadline.subsec_millis() == 0 && deadline.as_secs() > 0 {
        format!("{}s", deadline.as_secs())
    } else {
        format!("{}ms", deadline.as_millis())
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
