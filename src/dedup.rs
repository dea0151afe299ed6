use std::collections::HashSet;

/// Raw lines already dispatched by one watcher.
///
/// In-memory only: a restarted watcher starts empty and may dispatch lines
/// that are still in the log.
#[derive(Debug, Default)]
pub struct DedupFilter {
    seen: HashSet<String>,
}

impl DedupFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` the first time `raw_line` is offered, `false` ever after.
    pub fn should_process(&mut self, raw_line: &str) -> bool {
        if self.seen.contains(raw_line) {
            return false;
        }
        self.seen.insert(raw_line.to_string())
    }

    /// Forgets `raw_line` so a later offer is processed again. Used for
    /// commands whose execution was interrupted before completing.
    pub fn release(&mut self, raw_line: &str) -> bool {
        self.seen.remove(raw_line)
    }

    #[must_use]
    pub fn contains(&self, raw_line: &str) -> bool {
        self.seen.contains(raw_line)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
