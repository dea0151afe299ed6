//! Marker grammar for command lines.
//!
//! ```text
//! ... TRINITY_CMD ... CMD-ID: <id> | <rest>      remote call, payload = whole trimmed line
//! ... TRINITY_EXECUTE: <shell command>           shell exec, payload = text after the marker
//! ```
//!
//! When both markers appear the shell marker wins.

use thiserror::Error;
use tracing::warn;

use crate::log_store::LogRecord;

pub const REMOTE_CALL_MARKER: &str = "TRINITY_CMD";
pub const SHELL_EXEC_MARKER: &str = "TRINITY_EXECUTE:";
/// The id field, including the space that must follow the colon.
pub const COMMAND_ID_FIELD: &str = "CMD-ID: ";
pub const FIELD_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    RemoteCall,
    ShellExec,
}

impl CommandKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemoteCall => "remote_call",
            Self::ShellExec => "shell_exec",
        }
    }
}

/// A command extracted from exactly one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: Option<String>,
    pub kind: CommandKind,
    pub payload: String,
    /// Raw text of the originating line; the dedup key.
    pub source_line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedCommand {
    #[error("remote-call line carries no CMD-ID field")]
    MissingCommandId,
    #[error("remote-call line has an empty CMD-ID")]
    EmptyCommandId,
    #[error("shell-exec line has no command after the marker")]
    EmptyShellCommand,
}

impl MalformedCommand {
    /// The command kind the offending line was marked as.
    #[must_use]
    pub fn kind(self) -> CommandKind {
        match self {
            Self::MissingCommandId | Self::EmptyCommandId => CommandKind::RemoteCall,
            Self::EmptyShellCommand => CommandKind::ShellExec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Command(Command),
    Malformed(MalformedCommand),
    NoMatch,
}

/// Classifies one raw line. Pure: the same input always gives the same answer.
#[must_use]
pub fn recognize(line: &str) -> Recognition {
    if line.contains(SHELL_EXEC_MARKER) {
        return recognize_shell_exec(line);
    }
    if line.contains(REMOTE_CALL_MARKER) {
        return recognize_remote_call(line);
    }
    Recognition::NoMatch
}

/// Commands found in `records`, in log order. Malformed marker lines are
/// reported through `tracing` and skipped.
pub fn commands_in(records: &[LogRecord]) -> impl Iterator<Item = Command> + '_ {
    records
        .iter()
        .filter_map(|record| match recognize(&record.raw) {
            Recognition::Command(command) => Some(command),
            Recognition::Malformed(reason) => {
                warn!(offset = record.offset, %reason, "dropping malformed command line");
                None
            }
            Recognition::NoMatch => None,
        })
}

fn recognize_shell_exec(line: &str) -> Recognition {
    let payload = line
        .rsplit(SHELL_EXEC_MARKER)
        .next()
        .unwrap_or_default()
        .trim();

    if payload.is_empty() {
        return Recognition::Malformed(MalformedCommand::EmptyShellCommand);
    }

    Recognition::Command(Command {
        id: None,
        kind: CommandKind::ShellExec,
        payload: payload.to_string(),
        source_line: line.to_string(),
    })
}

fn recognize_remote_call(line: &str) -> Recognition {
    let trimmed = line.trim();
    let Some((_, after_field)) = trimmed.split_once(COMMAND_ID_FIELD) else {
        return Recognition::Malformed(MalformedCommand::MissingCommandId);
    };

    let id = after_field
        .split(FIELD_SEPARATOR)
        .next()
        .unwrap_or_default()
        .trim();
    if id.is_empty() {
        return Recognition::Malformed(MalformedCommand::EmptyCommandId);
    }

    Recognition::Command(Command {
        id: Some(id.to_string()),
        kind: CommandKind::RemoteCall,
        payload: trimmed.to_string(),
        source_line: line.to_string(),
    })
}
