//! Shared append-only log file acting as the command bus.
//!
//! Writers append whole lines through one `write` on an `O_APPEND` handle, so
//! concurrent writers in other processes never interleave partial lines. Inside
//! one process appends are additionally serialized by a mutex. Readers take no
//! lock: tailing only ever moves forward.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

use crate::cancel::{is_cancelled, sleep_unless_cancelled, CancelSignal};

/// Default log file name, resolved against the working directory.
pub const DEFAULT_LOG_FILE: &str = "trinity.log";

#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log source {path} is unavailable: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("refusing to append a record containing a line break to {path}")]
    EmbeddedNewline { path: PathBuf },
}

impl LogStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// One line of the log, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Byte offset of the first byte of the line.
    pub offset: u64,
    pub raw: String,
}

impl LogRecord {
    /// Offset just past this record's newline terminator.
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.offset + self.raw.len() as u64 + 1
    }
}

#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl LogStore {
    /// A store backed by `path`. The file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    /// A store backed by `path`, creating an empty file if none exists yet.
    pub fn open_or_create(path: impl Into<PathBuf>) -> Result<Self, LogStoreError> {
        let store = Self::new(path);
        if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| LogStoreError::io("creating log directory", parent, source))?;
        }
        store.open_append()?;
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `text` followed by a newline as a single write.
    pub fn append(&self, text: &str) -> Result<(), LogStoreError> {
        if text.contains('\n') || text.contains('\r') {
            return Err(LogStoreError::EmbeddedNewline {
                path: self.path.clone(),
            });
        }

        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');

        let _guard = lock_unpoisoned(&self.append_lock);
        let mut file = self.open_append()?;
        file.write_all(line.as_bytes())
            .map_err(|source| LogStoreError::io("appending record", &self.path, source))
    }

    /// All records currently stored, in append order.
    ///
    /// A trailing line without a terminator is included.
    pub fn read_all(&self) -> Result<Vec<LogRecord>, LogStoreError> {
        let bytes = fs::read(&self.path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => {
                LogStoreError::unavailable(&self.path, "log file does not exist")
            }
            _ => LogStoreError::io("reading log", &self.path, source),
        })?;

        let mut records = Vec::new();
        let consumed = split_complete_lines(&bytes, 0, &mut records);
        if consumed < bytes.len() {
            records.push(LogRecord {
                offset: consumed as u64,
                raw: decode_line(&bytes[consumed..]),
            });
        }
        Ok(records)
    }

    /// Byte length of the log; tailing from here yields only new records.
    pub fn end_position(&self) -> Result<u64, LogStoreError> {
        match fs::metadata(&self.path) {
            Ok(metadata) => Ok(metadata.len()),
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(source) => Err(LogStoreError::io("inspecting log", &self.path, source)),
        }
    }

    /// A lazy follower yielding batches of records appended after `position`.
    ///
    /// Nothing is opened until the first poll. The follower blocks between
    /// polls for `poll_interval` and ends once `cancel` is set.
    #[must_use]
    pub fn tail_from(&self, position: u64, poll_interval: Duration, cancel: CancelSignal) -> Tail {
        Tail {
            path: self.path.clone(),
            file: None,
            identity: None,
            position,
            pending: Vec::new(),
            poll_interval,
            cancel,
        }
    }

    fn open_append(&self) -> Result<File, LogStoreError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| LogStoreError::io("opening log for append", &self.path, source))
    }
}

/// Restartable tail-follow over a [`LogStore`] file.
///
/// Yields `Ok(batch)` with at least one complete record, or
/// `Err(SourceUnavailable)` when the file is missing, replaced, or shrank
/// below the read position. After an error the next call starts over by
/// reopening the path at the same position; callers that want the new file
/// from its start build a fresh tail from offset zero.
#[derive(Debug)]
pub struct Tail {
    path: PathBuf,
    file: Option<File>,
    identity: Option<FileIdentity>,
    position: u64,
    pending: Vec<u8>,
    poll_interval: Duration,
    cancel: CancelSignal,
}

impl Tail {
    /// Offset just past the last complete record handed out.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// One non-blocking check for new complete records.
    pub fn poll(&mut self) -> Result<Vec<LogRecord>, LogStoreError> {
        if self.file.is_none() {
            self.open()?;
        } else {
            self.check_source()?;
        }

        let Some(file) = self.file.as_mut() else {
            return Ok(Vec::new());
        };

        let mut chunk = Vec::new();
        if let Err(source) = file.read_to_end(&mut chunk) {
            self.reset();
            return Err(LogStoreError::io("reading log", &self.path, source));
        }
        self.pending.extend_from_slice(&chunk);

        let mut records = Vec::new();
        let consumed = split_complete_lines(&self.pending, self.position, &mut records);
        self.pending.drain(..consumed);
        self.position += consumed as u64;
        Ok(records)
    }

    fn open(&mut self) -> Result<(), LogStoreError> {
        let mut file = File::open(&self.path).map_err(|source| {
            LogStoreError::unavailable(&self.path, format!("cannot open for reading: {source}"))
        })?;
        let metadata = file
            .metadata()
            .map_err(|source| LogStoreError::io("inspecting log", &self.path, source))?;

        if metadata.len() < self.position {
            return Err(LogStoreError::unavailable(
                &self.path,
                format!(
                    "log is {} bytes, shorter than read position {}",
                    metadata.len(),
                    self.position
                ),
            ));
        }

        file.seek(SeekFrom::Start(self.position))
            .map_err(|source| LogStoreError::io("seeking log", &self.path, source))?;
        self.identity = FileIdentity::of(&metadata);
        self.pending.clear();
        self.file = Some(file);
        Ok(())
    }

    fn check_source(&mut self) -> Result<(), LogStoreError> {
        let on_disk = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(source) => {
                self.reset();
                return Err(LogStoreError::unavailable(
                    &self.path,
                    format!("log disappeared: {source}"),
                ));
            }
        };

        if FileIdentity::of(&on_disk) != self.identity {
            self.reset();
            return Err(LogStoreError::unavailable(&self.path, "log was replaced"));
        }

        let read_offset = self.position + self.pending.len() as u64;
        if on_disk.len() < read_offset {
            self.reset();
            return Err(LogStoreError::unavailable(
                &self.path,
                format!("log was truncated below offset {read_offset}"),
            ));
        }

        Ok(())
    }

    fn reset(&mut self) {
        self.file = None;
        self.identity = None;
        self.pending.clear();
    }
}

impl Iterator for Tail {
    type Item = Result<Vec<LogRecord>, LogStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if is_cancelled(&self.cancel) {
                return None;
            }

            match self.poll() {
                Ok(records) if !records.is_empty() => return Some(Ok(records)),
                Ok(_) => {
                    if !sleep_unless_cancelled(self.poll_interval, &self.cancel) {
                        return None;
                    }
                }
                Err(error) => return Some(Err(error)),
            }
        }
    }
}

/// Device and inode of an open log, used to notice rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    device: u64,
    inode: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_metadata: &Metadata) -> Option<Self> {
        None
    }
}

/// Moves every newline-terminated line of `bytes` into `records` and returns
/// the number of bytes consumed.
fn split_complete_lines(bytes: &[u8], base_offset: u64, records: &mut Vec<LogRecord>) -> usize {
    let mut start = 0;
    while let Some(relative) = bytes[start..].iter().position(|byte| *byte == b'\n') {
        let end = start + relative;
        records.push(LogRecord {
            offset: base_offset + start as u64,
            raw: decode_line(&bytes[start..end]),
        });
        start = end + 1;
    }
    start
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
