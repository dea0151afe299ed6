//! Log-based command bus.
//!
//! Invariant: the shared log is append-only, and every line this crate writes
//! is single-line and free of command markers.
//!
//! # Public API Overview
//! - [`LogStore`] appends whole lines and tails the log as a lazy,
//!   cancellable sequence of record batches.
//! - [`recognize`] turns one raw line into a [`Command`], a malformed-marker
//!   diagnostic, or no match.
//! - [`DedupFilter`] and [`SafetyFilter`] gate commands before execution.
//! - [`Executor`] is the single execution capability; [`ShellExecutor`] and
//!   [`RemoteCallExecutor`] implement it, and [`RetryPolicy::wrap`] decorates
//!   any executor with bounded retry.
//! - [`Dispatcher`] owns one watcher's state and runs the
//!   `Idle -> Scanning -> Dispatching` loop.
//! - [`BusConfig`] resolves the environment into ready-to-run dispatchers.

pub mod cancel;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod executor;
pub mod log_store;
pub mod recognizer;
pub mod record;
pub mod retry;
pub mod safety;

pub use crate::cancel::{cancel, is_cancelled, new_cancel_signal, CancelSignal};
pub use crate::config::{BusConfig, ConfigError};
pub use crate::dedup::DedupFilter;
pub use crate::dispatcher::{
    DispatchError, DispatchOutcome, DispatchSettings, DispatchStats, Dispatcher, DispatcherState,
    StartPosition,
};
pub use crate::executor::{
    ExecutionResult, Executor, FailureKind, RemoteCallExecutor, RemoteInitError, ShellExecutor,
};
pub use crate::log_store::{LogRecord, LogStore, LogStoreError, Tail};
pub use crate::recognizer::{recognize, Command, CommandKind, MalformedCommand, Recognition};
pub use crate::record::{parse_record_line, RecordLine, ResultStatus};
pub use crate::retry::{RetryPolicy, Retrying};
pub use crate::safety::SafetyFilter;
