//! The watch loop: tail the log, recognize commands, dedup, safety-check,
//! execute, and append one result record per command.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancel::{is_cancelled, sleep_unless_cancelled, CancelSignal};
use crate::dedup::DedupFilter;
use crate::executor::{ExecutionResult, Executor, FailureKind};
use crate::log_store::{LogRecord, LogStore, LogStoreError};
use crate::recognizer::{recognize, Command, CommandKind, MalformedCommand, Recognition};
use crate::record::{notice_line, result_line, timestamp_now, ResultStatus};
use crate::safety::SafetyFilter;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_SOURCE_BACKOFF: Duration = Duration::from_secs(5);

/// Where a fresh watcher begins reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Replay every line already in the log.
    Beginning,
    /// Only lines appended after startup.
    #[default]
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub poll_interval: Duration,
    pub start: StartPosition,
    /// Pause before reopening the log after it became unavailable.
    pub source_backoff: Duration,
    /// Consecutive source failures tolerated; `None` retries forever.
    pub source_retry_limit: Option<u32>,
    /// Append start and stop notices to the log.
    pub announce: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            start: StartPosition::End,
            source_backoff: DEFAULT_SOURCE_BACKOFF,
            source_retry_limit: None,
            announce: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Scanning,
    Dispatching,
}

/// What happened to one marker line routed to this dispatcher. Lines for
/// kinds it has no executor for produce no outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Executed or blocked; `recorded` is false when the append failed.
    Recorded { result: ExecutionResult, recorded: bool },
    Duplicate { line: String },
    Malformed { offset: u64, reason: MalformedCommand },
    /// Shutdown interrupted execution; the line was released from dedup.
    Cancelled { command: Command },
}

/// Counters accumulated over a dispatcher's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub batches: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub blocked: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub cancelled: u64,
    pub unrecorded: u64,
    pub source_errors: u64,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("log source failed {attempts} consecutive times: {source}")]
    SourceExhausted {
        attempts: u32,
        #[source]
        source: LogStoreError,
    },

    #[error(transparent)]
    Store(#[from] LogStoreError),
}

struct Route {
    executor: Box<dyn Executor>,
    deadline: Duration,
}

/// One watcher over a shared [`LogStore`].
///
/// Owns its seen-set and denylist, so several dispatchers can share a process
/// without sharing state. Dedup is in memory only and resets on restart.
pub struct Dispatcher {
    id: Uuid,
    store: Arc<LogStore>,
    routes: Vec<Route>,
    dedup: DedupFilter,
    safety: SafetyFilter,
    settings: DispatchSettings,
    cancel: CancelSignal,
    state: DispatcherState,
    stats: DispatchStats,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.id)
            .field("path", &self.store.path())
            .field("label", &self.label())
            .field("state", &self.state)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(store: Arc<LogStore>, cancel: CancelSignal) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            routes: Vec::new(),
            dedup: DedupFilter::new(),
            safety: SafetyFilter::default(),
            settings: DispatchSettings::default(),
            cancel,
            state: DispatcherState::Idle,
            stats: DispatchStats::default(),
        }
    }

    /// Routes commands of `executor.kind()` to `executor`. The first route
    /// registered for a kind wins.
    #[must_use]
    pub fn with_route(mut self, executor: impl Executor + 'static, deadline: Duration) -> Self {
        self.routes.push(Route {
            executor: Box::new(executor),
            deadline,
        });
        self
    }

    #[must_use]
    pub fn with_safety(mut self, safety: SafetyFilter) -> Self {
        self.safety = safety;
        self
    }

    #[must_use]
    pub fn with_dedup(mut self, dedup: DedupFilter) -> Self {
        self.dedup = dedup;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> DispatcherState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    #[must_use]
    pub fn dedup(&self) -> &DedupFilter {
        &self.dedup
    }

    #[must_use]
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Source label for notices: the route sources joined with `+`.
    #[must_use]
    pub fn label(&self) -> String {
        if self.routes.is_empty() {
            return "BUS".to_string();
        }
        self.routes
            .iter()
            .map(|route| route.executor.source())
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Handles one batch in log order. A failing line never stops the rest;
    /// cancellation stops before the next line.
    pub fn process_batch(&mut self, records: &[LogRecord]) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::new();
        self.state = DispatcherState::Scanning;

        for record in records {
            if is_cancelled(&self.cancel) {
                break;
            }
            match recognize(&record.raw) {
                Recognition::NoMatch => {}
                Recognition::Malformed(reason) => {
                    if self.route_index(reason.kind()).is_some() {
                        warn!(watcher = %self.id, offset = record.offset, %reason, "dropping malformed command line");
                        self.stats.malformed += 1;
                        outcomes.push(DispatchOutcome::Malformed {
                            offset: record.offset,
                            reason,
                        });
                    }
                }
                Recognition::Command(command) => {
                    self.state = DispatcherState::Dispatching;
                    if let Some(outcome) = self.dispatch(command) {
                        outcomes.push(outcome);
                    }
                    self.state = DispatcherState::Scanning;
                }
            }
        }

        self.state = DispatcherState::Idle;
        outcomes
    }

    /// Reads the whole log once and processes it. Does not announce or tail.
    pub fn run_once(&mut self) -> Result<Vec<DispatchOutcome>, DispatchError> {
        let records = self.store.read_all()?;
        self.stats.batches += 1;
        Ok(self.process_batch(&records))
    }

    /// Follows the log until the cancel signal fires.
    ///
    /// An unavailable source is retried after `source_backoff`, restarting
    /// from offset zero since the file was replaced or shrank; dedup keeps
    /// lines already handled from running again. Only exhausting
    /// `source_retry_limit` ends the loop with an error.
    pub fn run(&mut self) -> Result<DispatchStats, DispatchError> {
        let position = match self.settings.start {
            StartPosition::Beginning => 0,
            StartPosition::End => self.store.end_position()?,
        };

        info!(
            watcher = %self.id,
            label = %self.label(),
            path = %self.store.path().display(),
            position,
            "watcher started"
        );
        self.announce(&format!("watcher {} started", self.id));

        let outcome = self.follow(position);
        self.state = DispatcherState::Idle;

        match &outcome {
            Ok(()) => {
                info!(watcher = %self.id, stats = ?self.stats, "watcher stopped");
                self.announce(&format!("watcher {} stopped", self.id));
            }
            Err(error) => {
                error!(watcher = %self.id, %error, "watcher giving up");
                self.announce(&format!("watcher {} stopped: {error}", self.id));
            }
        }

        outcome.map(|()| self.stats.clone())
    }

    fn follow(&mut self, mut position: u64) -> Result<(), DispatchError> {
        let mut consecutive_failures: u32 = 0;

        loop {
            let mut tail = self
                .store
                .tail_from(position, self.settings.poll_interval, self.cancel.clone());

            let failure = loop {
                match tail.next() {
                    None => break None,
                    Some(Ok(records)) => {
                        consecutive_failures = 0;
                        self.stats.batches += 1;
                        debug!(watcher = %self.id, records = records.len(), position = tail.position(), "new batch");
                        if is_cancelled(&self.cancel) {
                            break None;
                        }
                        self.process_batch(&records);
                    }
                    Some(Err(error)) => break Some(error),
                }
            };

            let Some(error) = failure else {
                return Ok(());
            };

            consecutive_failures = consecutive_failures.saturating_add(1);
            self.stats.source_errors += 1;
            warn!(
                watcher = %self.id,
                %error,
                attempt = consecutive_failures,
                backoff_ms = u64::try_from(self.settings.source_backoff.as_millis()).unwrap_or(u64::MAX),
                "log source unavailable"
            );

            if let Some(limit) = self.settings.source_retry_limit {
                if consecutive_failures > limit {
                    return Err(DispatchError::SourceExhausted {
                        attempts: consecutive_failures,
                        source: error,
                    });
                }
            }
            if !sleep_unless_cancelled(self.settings.source_backoff, &self.cancel) {
                return Ok(());
            }
            position = 0;
        }
    }

    fn route_index(&self, kind: CommandKind) -> Option<usize> {
        self.routes
            .iter()
            .position(|route| route.executor.kind() == kind)
    }

    fn dispatch(&mut self, command: Command) -> Option<DispatchOutcome> {
        let index = self.route_index(command.kind)?;

        if !self.dedup.should_process(&command.source_line) {
            debug!(watcher = %self.id, kind = command.kind.as_str(), cmd_id = ?command.id, "skipping duplicate command line");
            self.stats.duplicates += 1;
            return Some(DispatchOutcome::Duplicate {
                line: command.source_line,
            });
        }

        let route = &self.routes[index];
        let source = route.executor.source().to_string();

        if SafetyFilter::applies_to(command.kind) {
            if let Some(pattern) = self.safety.blocked_by(&command.payload) {
                warn!(watcher = %self.id, command = %command.payload, pattern, "blocked by denylist");
                let result = ExecutionResult::blocked(&command, pattern);
                self.stats.blocked += 1;
                let recorded = self.record(&source, &command, &result);
                return Some(DispatchOutcome::Recorded { result, recorded });
            }
        }

        info!(watcher = %self.id, kind = command.kind.as_str(), cmd_id = ?command.id, "dispatching command");
        let result = route.executor.execute(&command, route.deadline, &self.cancel);

        if result.failure == Some(FailureKind::Cancelled) {
            info!(watcher = %self.id, cmd_id = ?command.id, "execution cancelled, releasing command");
            self.dedup.release(&command.source_line);
            self.stats.cancelled += 1;
            return Some(DispatchOutcome::Cancelled { command });
        }

        match ResultStatus::of(&result) {
            ResultStatus::Success => self.stats.succeeded += 1,
            _ => self.stats.failed += 1,
        }
        info!(
            watcher = %self.id,
            cmd_id = ?command.id,
            status = ResultStatus::of(&result).as_str(),
            attempts = result.attempts,
            duration_ms = result.duration_ms,
            "command finished"
        );

        let recorded = self.record(&source, &command, &result);
        Some(DispatchOutcome::Recorded { result, recorded })
    }

    fn record(&mut self, source: &str, command: &Command, result: &ExecutionResult) -> bool {
        let line = result_line(source, &timestamp_now(), command, result);
        match self.store.append(&line) {
            Ok(()) => true,
            Err(error) => {
                error!(watcher = %self.id, cmd_id = ?command.id, %error, "failed to record result");
                self.stats.unrecorded += 1;
                false
            }
        }
    }

    fn announce(&self, message: &str) {
        if !self.settings.announce {
            return;
        }
        let line = notice_line(&self.label(), &timestamp_now(), message);
        if let Err(error) = self.store.append(&line) {
            warn!(watcher = %self.id, %error, "failed to append notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use crate::cancel::{cancel, new_cancel_signal};
    use crate::record::parse_record_line;
    use crate::retry::RetryPolicy;

    /// Succeeds, echoing the payload, and counts calls.
    struct EchoExecutor {
        kind: CommandKind,
        calls: Arc<AtomicU32>,
        failure: Option<FailureKind>,
    }

    impl EchoExecutor {
        fn new(kind: CommandKind) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    kind,
                    calls: Arc::clone(&calls),
                    failure: None,
                },
                calls,
            )
        }

        fn failing(kind: CommandKind, failure: FailureKind) -> Self {
            Self {
                kind,
                calls: Arc::new(AtomicU32::new(0)),
                failure: Some(failure),
            }
        }
    }

    impl Executor for EchoExecutor {
        fn source(&self) -> &str {
            match self.kind {
                CommandKind::ShellExec => "SHELL",
                CommandKind::RemoteCall => "REMOTE",
            }
        }

        fn kind(&self) -> CommandKind {
            self.kind
        }

        fn execute(&self, command: &Command, _deadline: Duration, _cancel: &CancelSignal) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.failure {
                None => ExecutionResult::success(command, command.payload.clone(), 0, Instant::now()),
                Some(FailureKind::Cancelled) => ExecutionResult::cancelled(command, Instant::now()),
                Some(failure) => ExecutionResult::failed(command, failure, "boom", 1, Instant::now()),
            }
        }
    }

    fn store_with(lines: &[&str]) -> (tempfile::TempDir, Arc<LogStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open_or_create(dir.path().join("bus.log")).unwrap();
        for line in lines {
            store.append(line).unwrap();
        }
        (dir, Arc::new(store))
    }

    fn result_messages(store: &LogStore) -> Vec<String> {
        store
            .read_all()
            .unwrap()
            .iter()
            .filter_map(|record| parse_record_line(&record.raw).map(|line| line.message.to_string()))
            .collect()
    }

    #[test]
    fn duplicates_blocked_and_executed_lines_in_one_batch() {
        let (_dir, store) = store_with(&[
            "TRINITY_EXECUTE: echo hi",
            "TRINITY_EXECUTE: echo hi",
            "TRINITY_EXECUTE: tail -f /var/log/foo",
        ]);
        let (executor, calls) = EchoExecutor::new(CommandKind::ShellExec);
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), new_cancel_signal())
            .with_route(executor, Duration::from_secs(5));

        let outcomes = dispatcher.run_once().unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_matches!(&outcomes[0], DispatchOutcome::Recorded { result, recorded: true } if result.is_success());
        assert_matches!(&outcomes[1], DispatchOutcome::Duplicate { .. });
        assert_matches!(
            &outcomes[2],
            DispatchOutcome::Recorded { result, recorded: true } if result.failure == Some(FailureKind::Blocked)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.state(), DispatcherState::Idle);

        let messages = result_messages(&store);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("SUCCESS echo hi (exit=0, "));
        assert!(messages[1].starts_with("BLOCKED tail -f /var/log/foo"));
    }

    #[test]
    fn rerunning_over_own_results_dispatches_nothing_new() {
        let (_dir, store) = store_with(&["TRINITY_EXECUTE: echo hi"]);
        let (executor, calls) = EchoExecutor::new(CommandKind::ShellExec);
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), new_cancel_signal())
            .with_route(executor, Duration::from_secs(5));

        dispatcher.run_once().unwrap();
        let second = dispatcher.run_once().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_matches!(second.as_slice(), [DispatchOutcome::Duplicate { .. }]);
    }

    #[test]
    fn commands_for_other_kinds_are_left_alone() {
        let (_dir, store) = store_with(&[
            "TRINITY_CMD | CMD-ID: 1 | review",
            "TRINITY_CMD no id here",
            "TRINITY_EXECUTE: echo shell",
        ]);
        let (executor, calls) = EchoExecutor::new(CommandKind::ShellExec);
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), new_cancel_signal())
            .with_route(executor, Duration::from_secs(5));

        let outcomes = dispatcher.run_once().unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!dispatcher.dedup().contains("TRINITY_CMD | CMD-ID: 1 | review"));
        assert_eq!(dispatcher.stats().malformed, 0);
    }

    #[test]
    fn malformed_line_does_not_stop_the_batch() {
        let (_dir, store) = store_with(&[
            "TRINITY_CMD no id here",
            "TRINITY_CMD | CMD-ID: 7 | review this",
        ]);
        let (executor, calls) = EchoExecutor::new(CommandKind::RemoteCall);
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), new_cancel_signal())
            .with_route(executor, Duration::from_secs(5));

        let outcomes = dispatcher.run_once().unwrap();

        assert_matches!(
            &outcomes[0],
            DispatchOutcome::Malformed { offset: 0, reason: MalformedCommand::MissingCommandId }
        );
        assert_matches!(&outcomes[1], DispatchOutcome::Recorded { recorded: true, .. });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let messages = result_messages(&store);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("SUCCESS [7] remote call"));
    }

    #[test]
    fn remote_payloads_skip_the_denylist() {
        let (_dir, store) = store_with(&["TRINITY_CMD | CMD-ID: 3 | explain tail -f"]);
        let (executor, calls) = EchoExecutor::new(CommandKind::RemoteCall);
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), new_cancel_signal())
            .with_route(executor, Duration::from_secs(5));

        dispatcher.run_once().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.stats().blocked, 0);
    }

    #[test]
    fn failed_execution_is_recorded_and_stays_seen() {
        let (_dir, store) = store_with(&["TRINITY_EXECUTE: make"]);
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), new_cancel_signal()).with_route(
            EchoExecutor::failing(CommandKind::ShellExec, FailureKind::Application),
            Duration::from_secs(5),
        );

        dispatcher.run_once().unwrap();

        assert!(dispatcher.dedup().contains("TRINITY_EXECUTE: make"));
        assert_eq!(dispatcher.stats().failed, 1);
        let messages = result_messages(&store);
        assert!(messages[0].starts_with("FAILED make (exit=1, "));
        assert!(messages[0].ends_with("-> boom"));
    }

    #[test]
    fn cancelled_execution_is_released_and_not_recorded() {
        let (_dir, store) = store_with(&["TRINITY_EXECUTE: sleep 100"]);
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), new_cancel_signal()).with_route(
            EchoExecutor::failing(CommandKind::ShellExec, FailureKind::Cancelled),
            Duration::from_secs(5),
        );

        let outcomes = dispatcher.run_once().unwrap();

        assert_matches!(outcomes.as_slice(), [DispatchOutcome::Cancelled { .. }]);
        assert!(dispatcher.dedup().is_empty());
        assert!(result_messages(&store).is_empty());
    }

    #[test]
    fn cancel_during_retry_backoff_is_released_and_not_recorded() {
        let (_dir, store) = store_with(&["TRINITY_EXECUTE: make"]);
        let signal = new_cancel_signal();
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), signal.clone()).with_route(
            RetryPolicy::default()
                .with_base_delay(Duration::from_secs(30))
                .wrap(EchoExecutor::failing(CommandKind::ShellExec, FailureKind::Timeout)),
            Duration::from_secs(1),
        );

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            cancel(&signal);
        });
        let started = Instant::now();
        let outcomes = dispatcher.run_once().unwrap();
        canceller.join().unwrap();

        assert_matches!(outcomes.as_slice(), [DispatchOutcome::Cancelled { .. }]);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(dispatcher.dedup().is_empty());
        assert!(result_messages(&store).is_empty());
        assert_eq!(dispatcher.stats().cancelled, 1);
    }

    #[test]
    fn cancelled_signal_stops_before_next_line() {
        let (_dir, store) = store_with(&["TRINITY_EXECUTE: echo a", "TRINITY_EXECUTE: echo b"]);
        let signal = new_cancel_signal();
        cancel(&signal);
        let (executor, calls) = EchoExecutor::new(CommandKind::ShellExec);
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), signal).with_route(executor, Duration::from_secs(5));

        let outcomes = dispatcher.run_once().unwrap();

        assert!(outcomes.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(dispatcher.dedup().is_empty());
    }

    #[test]
    fn injected_seen_set_suppresses_known_lines() {
        let (_dir, store) = store_with(&["TRINITY_EXECUTE: echo hi"]);
        let mut seen = DedupFilter::new();
        assert!(seen.should_process("TRINITY_EXECUTE: echo hi"));
        let (executor, calls) = EchoExecutor::new(CommandKind::ShellExec);
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), new_cancel_signal())
            .with_dedup(seen)
            .with_route(executor, Duration::from_secs(5));

        dispatcher.run_once().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn custom_denylist_replaces_default() {
        let (_dir, store) = store_with(&["TRINITY_EXECUTE: tail -f x", "TRINITY_EXECUTE: rm -rf build"]);
        let (executor, calls) = EchoExecutor::new(CommandKind::ShellExec);
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), new_cancel_signal())
            .with_safety(SafetyFilter::new(["rm -rf"]))
            .with_route(executor, Duration::from_secs(5));

        dispatcher.run_once().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let messages = result_messages(&store);
        assert!(messages[0].starts_with("SUCCESS tail -f x"));
        assert!(messages[1].starts_with("BLOCKED rm -rf build"));
    }

    #[test]
    fn label_joins_route_sources() {
        let (_dir, store) = store_with(&[]);
        let dispatcher = Dispatcher::new(Arc::clone(&store), new_cancel_signal());
        assert_eq!(dispatcher.label(), "BUS");

        let dispatcher = dispatcher
            .with_route(EchoExecutor::new(CommandKind::ShellExec).0, Duration::from_secs(1))
            .with_route(EchoExecutor::new(CommandKind::RemoteCall).0, Duration::from_secs(1));
        assert_eq!(dispatcher.label(), "SHELL+REMOTE");
    }

    #[test]
    fn run_gives_up_after_source_retry_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::new(dir.path().join("missing.log")));
        let settings = DispatchSettings {
            poll_interval: Duration::from_millis(10),
            start: StartPosition::Beginning,
            source_backoff: Duration::from_millis(10),
            source_retry_limit: Some(2),
            announce: false,
        };
        let mut dispatcher = Dispatcher::new(Arc::clone(&store), new_cancel_signal())
            .with_settings(settings)
            .with_route(EchoExecutor::new(CommandKind::ShellExec).0, Duration::from_secs(1));

        let error = dispatcher.run().unwrap_err();

        assert_matches!(error, DispatchError::SourceExhausted { attempts: 3, .. });
        assert_eq!(dispatcher.stats().source_errors, 3);
    }
}
