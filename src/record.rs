//! Result and notice lines written back to the shared log.
//!
//! ```text
//! [<SOURCE>][<YYYY-MM-DD HH:MM:SS>] <STATUS> [<cmd-id>] <subject> (exit=<code>, <ms>ms) -> <detail>
//! [<SOURCE>][<YYYY-MM-DD HH:MM:SS>] <notice>
//! ```
//!
//! Every line is single-line and marker-free, so watchers never mistake
//! their own output for a new command.

use time::macros::format_description;
use time::OffsetDateTime;

use crate::executor::{ExecutionResult, FailureKind};
use crate::recognizer::{Command, CommandKind, REMOTE_CALL_MARKER, SHELL_EXEC_MARKER};

/// Upper bound on the detail portion of a result line.
pub const MAX_DETAIL_BYTES: usize = 16 * 1024;

const TRUNCATION_SUFFIX: &str = "[truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Success,
    Failed,
    Timeout,
    Blocked,
}

impl ResultStatus {
    #[must_use]
    pub fn of(result: &ExecutionResult) -> Self {
        match result.failure {
            None => Self::Success,
            Some(FailureKind::Timeout) => Self::Timeout,
            Some(FailureKind::Blocked) => Self::Blocked,
            Some(_) => Self::Failed,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Blocked => "BLOCKED",
        }
    }
}

/// A parsed `[<SOURCE>][<timestamp>] <message>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLine<'a> {
    pub source: &'a str,
    pub timestamp: &'a str,
    pub message: &'a str,
}

/// Splits a bus-written line into its parts; `None` for any other line.
#[must_use]
pub fn parse_record_line(line: &str) -> Option<RecordLine<'_>> {
    let rest = line.strip_prefix('[')?;
    let (source, rest) = rest.split_once("][")?;
    let (timestamp, message) = rest.split_once("] ")?;
    if source.is_empty() || timestamp.is_empty() {
        return None;
    }
    Some(RecordLine {
        source,
        timestamp,
        message,
    })
}

/// Current UTC time as `YYYY-MM-DD HH:MM:SS`.
#[must_use]
pub fn timestamp_now() -> String {
    format_timestamp(OffsetDateTime::now_utc())
}

#[must_use]
pub fn format_timestamp(at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    at.format(&format)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// The result line for `result` of `command`, stamped `timestamp`.
#[must_use]
pub fn result_line(source: &str, timestamp: &str, command: &Command, result: &ExecutionResult) -> String {
    let status = ResultStatus::of(result);
    let subject = match command.kind {
        CommandKind::ShellExec => sanitize(&command.payload),
        CommandKind::RemoteCall => "remote call".to_string(),
    };
    let id = result
        .command_id
        .as_deref()
        .map(|id| format!("[{}] ", sanitize(id)))
        .unwrap_or_default();
    let detail = if result.is_success() {
        &result.output
    } else {
        &result.error_detail
    };

    format!(
        "[{source}][{timestamp}] {} {id}{subject} (exit={}, {}ms) -> {}",
        status.as_str(),
        result.exit_code,
        result.duration_ms,
        sanitize(&truncate_to_byte_limit(detail.clone(), MAX_DETAIL_BYTES)),
    )
}

/// A free-form notice line such as a watcher start announcement.
#[must_use]
pub fn notice_line(source: &str, timestamp: &str, message: &str) -> String {
    format!("[{source}][{timestamp}] {}", sanitize(message))
}

/// Escapes line breaks and defuses command markers.
#[must_use]
pub fn sanitize(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
        .replace(SHELL_EXEC_MARKER, &SHELL_EXEC_MARKER.to_lowercase())
        .replace(REMOTE_CALL_MARKER, &REMOTE_CALL_MARKER.to_lowercase())
}

pub(crate) fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes.min(content.len());
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push('\n');
    truncated.push_str(TRUNCATION_SUFFIX);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Instant;

    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    use crate::recognizer::{recognize, Recognition};

    fn shell_command(payload: &str) -> Command {
        Command {
            id: None,
            kind: CommandKind::ShellExec,
            payload: payload.to_string(),
            source_line: format!("TRINITY_EXECUTE: {payload}"),
        }
    }

    fn remote_command(id: &str) -> Command {
        let line = format!("TRINITY_CMD | CMD-ID: {id} | review");
        Command {
            id: Some(id.to_string()),
            kind: CommandKind::RemoteCall,
            payload: line.clone(),
            source_line: line,
        }
    }

    #[test]
    fn timestamp_has_fixed_shape() {
        assert_eq!(
            format_timestamp(datetime!(2026-03-04 05:06:07 UTC)),
            "2026-03-04 05:06:07"
        );
    }

    #[test]
    fn shell_success_line_layout() {
        let command = shell_command("echo hi");
        let mut result = ExecutionResult::success(&command, "hi", 0, Instant::now());
        result.duration_ms = 12;

        assert_eq!(
            result_line("SHELL", "2026-03-04 05:06:07", &command, &result),
            "[SHELL][2026-03-04 05:06:07] SUCCESS echo hi (exit=0, 12ms) -> hi"
        );
    }

    #[test]
    fn remote_line_carries_id_but_not_payload() {
        let command = remote_command("42");
        let mut result = ExecutionResult::success(&command, "Looks fine", 0, Instant::now());
        result.duration_ms = 900;

        let line = result_line("REMOTE", "2026-03-04 05:06:07", &command, &result);
        assert_eq!(
            line,
            "[REMOTE][2026-03-04 05:06:07] SUCCESS [42] remote call (exit=0, 900ms) -> Looks fine"
        );
    }

    #[test]
    fn blocked_line_uses_blocked_status() {
        let command = shell_command("tail -f /var/log/foo");
        let result = ExecutionResult::blocked(&command, "tail -f");

        let line = result_line("SHELL", "ts", &command, &result);
        let parsed = parse_record_line(&line).expect("record line");
        assert!(parsed.message.starts_with("BLOCKED tail -f /var/log/foo"));
        assert!(parsed.message.ends_with("-> blocked by denylist entry 'tail -f'"));
    }

    #[test]
    fn result_lines_are_never_recognized_as_commands() {
        let command = shell_command("cat commands.txt");
        let output = "line one\nTRINITY_EXECUTE: rm -rf /\nTRINITY_CMD | CMD-ID: 9 | x";
        let result = ExecutionResult::success(&command, output, 0, Instant::now());

        let line = result_line("SHELL", "ts", &command, &result);
        assert!(!line.contains('\n'));
        assert_eq!(recognize(&line), Recognition::NoMatch);
        assert!(line.contains("trinity_execute: rm -rf /"));
    }

    #[test]
    fn long_detail_is_truncated() {
        let command = shell_command("yes");
        let result = ExecutionResult::success(&command, "y".repeat(MAX_DETAIL_BYTES * 2), 0, Instant::now());

        let line = result_line("SHELL", "ts", &command, &result);
        assert!(line.len() < MAX_DETAIL_BYTES + 200);
        assert!(line.ends_with("\\n[truncated]"));
    }

    #[test]
    fn parse_record_line_round_trips_notice() {
        let line = notice_line("SHELL", "2026-03-04 05:06:07", "watcher abc started");
        assert_eq!(
            parse_record_line(&line),
            Some(RecordLine {
                source: "SHELL",
                timestamp: "2026-03-04 05:06:07",
                message: "watcher abc started",
            })
        );
        assert_eq!(parse_record_line("TRINITY_EXECUTE: ls"), None);
    }
}
