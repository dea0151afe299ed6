use crate::recognizer::CommandKind;

/// Substrings that block a shell command when no denylist is configured:
/// endless watch loops and the watcher invoking itself.
pub const DEFAULT_DENYLIST: [&str; 4] = ["tail -f", "while true", "trinity_watch", "trinity-watch"];

/// Case-insensitive substring denylist for shell commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyFilter {
    denied: Vec<String>,
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DENYLIST)
    }
}

impl SafetyFilter {
    /// Blank patterns are ignored.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let denied = patterns
            .into_iter()
            .map(|pattern| pattern.as_ref().trim().to_lowercase())
            .filter(|pattern| !pattern.is_empty())
            .collect();
        Self { denied }
    }

    /// Only shell commands run local code; remote calls bypass the filter.
    #[must_use]
    pub fn applies_to(kind: CommandKind) -> bool {
        kind == CommandKind::ShellExec
    }

    #[must_use]
    pub fn is_allowed(&self, payload: &str) -> bool {
        self.blocked_by(payload).is_none()
    }

    /// The first denylist entry found in `payload`, if any.
    #[must_use]
    pub fn blocked_by(&self, payload: &str) -> Option<&str> {
        let payload = payload.to_lowercase();
        self.denied
            .iter()
            .find(|pattern| payload.contains(pattern.as_str()))
            .map(String::as_str)
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.denied
    }
}
