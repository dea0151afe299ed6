//! Environment configuration.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chat_api::ChatApiConfig;
use thiserror::Error;

use crate::cancel::CancelSignal;
use crate::dispatcher::{
    DispatchSettings, Dispatcher, StartPosition, DEFAULT_POLL_INTERVAL, DEFAULT_SOURCE_BACKOFF,
};
use crate::executor::{RemoteCallExecutor, RemoteInitError, ShellExecutor};
use crate::log_store::{LogStore, DEFAULT_LOG_FILE};
use crate::recognizer::CommandKind;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::safety::{SafetyFilter, DEFAULT_DENYLIST};

pub const DEFAULT_API_URL: &str = "https://api.x.ai/v1/chat/completions";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const API_KEY_VARS: [&str; 2] = ["XAI_API_KEY", "GROK_API_KEY"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("unknown command kind {0:?} in TRINITY_WATCH_KINDS (expected shell or remote)")]
    UnknownKind(String),

    #[error("unknown start position {0:?} in TRINITY_START_AT (expected end or beginning)")]
    UnknownStartPosition(String),

    #[error("TRINITY_WATCH_KINDS selects no command kinds")]
    NoKinds,

    #[error("remote calls are enabled but neither XAI_API_KEY nor GROK_API_KEY is set")]
    MissingCredential,

    #[error("failed to set up remote executor: {0}")]
    RemoteInit(#[from] RemoteInitError),
}

/// Everything a watcher process needs, resolved once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub log_path: PathBuf,
    pub poll_interval: Duration,
    pub start: StartPosition,
    pub kinds: Vec<CommandKind>,
    pub denylist: Vec<String>,
    pub shell_timeout: Duration,
    pub remote_timeout: Duration,
    pub retry_attempts: u32,
    pub source_retry_limit: Option<u32>,
    pub api_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConfig")
            .field("log_path", &self.log_path)
            .field("poll_interval", &self.poll_interval)
            .field("start", &self.start)
            .field("kinds", &self.kinds)
            .field("denylist", &self.denylist)
            .field("shell_timeout", &self.shell_timeout)
            .field("remote_timeout", &self.remote_timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("source_retry_limit", &self.source_retry_limit)
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(DEFAULT_LOG_FILE),
            poll_interval: DEFAULT_POLL_INTERVAL,
            start: StartPosition::End,
            kinds: vec![CommandKind::ShellExec, CommandKind::RemoteCall],
            denylist: DEFAULT_DENYLIST.iter().map(|entry| entry.to_string()).collect(),
            shell_timeout: DEFAULT_COMMAND_TIMEOUT,
            remote_timeout: DEFAULT_COMMAND_TIMEOUT,
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            source_retry_limit: None,
            api_url: DEFAULT_API_URL.to_string(),
            model: chat_api::config::DEFAULT_MODEL.to_string(),
            api_key: None,
        }
    }
}

impl BusConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolves configuration through `lookup` instead of the process
    /// environment. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| non_blank(lookup(key));
        let mut config = Self::default();

        if let Some(path) = value("TRINITY_LOG_PATH") {
            config.log_path = PathBuf::from(path);
        }
        if let Some(ms) = parse_number(&value, "TRINITY_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(start) = value("TRINITY_START_AT") {
            config.start = parse_start(&start)?;
        }
        if let Some(kinds) = value("TRINITY_WATCH_KINDS") {
            config.kinds = parse_kinds(&kinds)?;
        }
        if let Some(denylist) = value("TRINITY_DENYLIST") {
            config.denylist = split_list(&denylist).map(str::to_string).collect();
        }
        if let Some(secs) = parse_number(&value, "TRINITY_SHELL_TIMEOUT_SEC")? {
            config.shell_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_number(&value, "TRINITY_REMOTE_TIMEOUT_SEC")? {
            config.remote_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_number(&value, "TRINITY_RETRY_ATTEMPTS")? {
            config.retry_attempts = clamp_u32(attempts).max(1);
        }
        if let Some(limit) = parse_number(&value, "TRINITY_SOURCE_RETRY_LIMIT")? {
            config.source_retry_limit = Some(clamp_u32(limit));
        }
        if let Some(url) = value("TRINITY_API_URL") {
            config.api_url = url;
        }
        if let Some(model) = value("TRINITY_MODEL") {
            config.model = model;
        }
        config.api_key = API_KEY_VARS.iter().find_map(|key| value(*key));

        if config.watches(CommandKind::RemoteCall) && config.api_key.is_none() {
            return Err(ConfigError::MissingCredential);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = log_path.into();
        self
    }

    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = CommandKind>) -> Self {
        self.kinds = Vec::new();
        for kind in kinds {
            if !self.kinds.contains(&kind) {
                self.kinds.push(kind);
            }
        }
        self
    }

    #[must_use]
    pub fn with_start(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn watches(&self, kind: CommandKind) -> bool {
        self.kinds.contains(&kind)
    }

    #[must_use]
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            poll_interval: self.poll_interval,
            start: self.start,
            source_backoff: DEFAULT_SOURCE_BACKOFF,
            source_retry_limit: self.source_retry_limit,
            announce: true,
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.retry_attempts)
    }

    #[must_use]
    pub fn safety_filter(&self) -> SafetyFilter {
        SafetyFilter::new(self.denylist.iter())
    }

    pub fn chat_config(&self) -> Result<ChatApiConfig, ConfigError> {
        let api_key = self.api_key.clone().ok_or(ConfigError::MissingCredential)?;
        Ok(ChatApiConfig::new(api_key)
            .with_base_url(self.api_url.clone())
            .with_model(self.model.clone()))
    }

    /// One independent dispatcher per configured kind, all over `store`.
    pub fn build_dispatchers(
        &self,
        store: &Arc<LogStore>,
        cancel: &CancelSignal,
    ) -> Result<Vec<Dispatcher>, ConfigError> {
        if self.kinds.is_empty() {
            return Err(ConfigError::NoKinds);
        }

        let mut dispatchers = Vec::with_capacity(self.kinds.len());
        for kind in &self.kinds {
            let dispatcher = Dispatcher::new(Arc::clone(store), cancel.clone())
                .with_settings(self.dispatch_settings())
                .with_safety(self.safety_filter());
            let dispatcher = match kind {
                CommandKind::ShellExec => dispatcher.with_route(
                    self.retry_policy().wrap(ShellExecutor::new()),
                    self.shell_timeout,
                ),
                CommandKind::RemoteCall => dispatcher.with_route(
                    self.retry_policy()
                        .wrap(RemoteCallExecutor::new(self.chat_config()?)?),
                    self.remote_timeout,
                ),
            };
            dispatchers.push(dispatcher);
        }
        Ok(dispatchers)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_string())
        }
    })
}

fn parse_number<F>(value: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    value(key)
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber { key, value: raw })
        })
        .transpose()
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|entry| !entry.is_empty())
}

fn parse_start(raw: &str) -> Result<StartPosition, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "end" => Ok(StartPosition::End),
        "beginning" | "start" => Ok(StartPosition::Beginning),
        _ => Err(ConfigError::UnknownStartPosition(raw.to_string())),
    }
}

fn parse_kinds(raw: &str) -> Result<Vec<CommandKind>, ConfigError> {
    let mut kinds = Vec::new();
    for entry in split_list(raw) {
        let kind = match entry.to_ascii_lowercase().as_str() {
            "shell" => CommandKind::ShellExec,
            "remote" => CommandKind::RemoteCall,
            _ => return Err(ConfigError::UnknownKind(entry.to_string())),
        };
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    if kinds.is_empty() {
        return Err(ConfigError::NoKinds);
    }
    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use crate::cancel::new_cancel_signal;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = BusConfig::from_lookup(lookup(&[("XAI_API_KEY", "secret")])).unwrap();

        assert_eq!(config.log_path, PathBuf::from("trinity.log"));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.start, StartPosition::End);
        assert_eq!(config.kinds, vec![CommandKind::ShellExec, CommandKind::RemoteCall]);
        assert_eq!(config.shell_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.source_retry_limit, None);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.model, "grok-4");
        assert_eq!(config.denylist, vec!["tail -f", "while true", "trinity_watch", "trinity-watch"]);
    }

    #[test]
    fn missing_credential_is_an_error_only_when_remote_is_watched() {
        assert_matches!(
            BusConfig::from_lookup(lookup(&[])),
            Err(ConfigError::MissingCredential)
        );
        assert_matches!(
            BusConfig::from_lookup(lookup(&[("XAI_API_KEY", "   ")])),
            Err(ConfigError::MissingCredential)
        );

        let shell_only = BusConfig::from_lookup(lookup(&[("TRINITY_WATCH_KINDS", "shell")])).unwrap();
        assert_eq!(shell_only.kinds, vec![CommandKind::ShellExec]);
        assert_eq!(shell_only.api_key, None);
    }

    #[test]
    fn grok_key_is_used_when_xai_key_is_absent() {
        let config = BusConfig::from_lookup(lookup(&[("GROK_API_KEY", "g")])).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("g"));

        let config = BusConfig::from_lookup(lookup(&[("GROK_API_KEY", "g"), ("XAI_API_KEY", "x")])).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("x"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = BusConfig::from_lookup(lookup(&[
            ("TRINITY_LOG_PATH", "/tmp/bus.log"),
            ("TRINITY_POLL_INTERVAL_MS", "50"),
            ("TRINITY_START_AT", "Beginning"),
            ("TRINITY_WATCH_KINDS", "remote, shell, remote"),
            ("TRINITY_DENYLIST", "rm -rf, ,shutdown"),
            ("TRINITY_SHELL_TIMEOUT_SEC", "5"),
            ("TRINITY_REMOTE_TIMEOUT_SEC", "60"),
            ("TRINITY_RETRY_ATTEMPTS", "0"),
            ("TRINITY_SOURCE_RETRY_LIMIT", "4"),
            ("TRINITY_API_URL", "http://localhost:9000/v1"),
            ("TRINITY_MODEL", "grok-3"),
            ("XAI_API_KEY", "k"),
        ]))
        .unwrap();

        assert_eq!(config.log_path, PathBuf::from("/tmp/bus.log"));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.start, StartPosition::Beginning);
        assert_eq!(config.kinds, vec![CommandKind::RemoteCall, CommandKind::ShellExec]);
        assert_eq!(config.denylist, vec!["rm -rf", "shutdown"]);
        assert_eq!(config.shell_timeout, Duration::from_secs(5));
        assert_eq!(config.remote_timeout, Duration::from_secs(60));
        assert_eq!(config.retry_attempts, 1);
        assert_eq!(config.source_retry_limit, Some(4));

        let chat = config.chat_config().unwrap();
        assert_eq!(chat.base_url, "http://localhost:9000/v1");
        assert_eq!(chat.model, "grok-3");
        assert_eq!(chat.temperature, 0.0);
    }

    #[test]
    fn invalid_values_are_reported() {
        assert_matches!(
            BusConfig::from_lookup(lookup(&[("TRINITY_WATCH_KINDS", "shell"), ("TRINITY_POLL_INTERVAL_MS", "fast")])),
            Err(ConfigError::InvalidNumber { key: "TRINITY_POLL_INTERVAL_MS", .. })
        );
        assert_matches!(
            BusConfig::from_lookup(lookup(&[("TRINITY_WATCH_KINDS", "shell,python")])),
            Err(ConfigError::UnknownKind(kind)) if kind == "python"
        );
        assert_matches!(
            BusConfig::from_lookup(lookup(&[("TRINITY_WATCH_KINDS", " , ")])),
            Err(ConfigError::NoKinds)
        );
        assert_matches!(
            BusConfig::from_lookup(lookup(&[("TRINITY_WATCH_KINDS", "shell"), ("TRINITY_START_AT", "middle")])),
            Err(ConfigError::UnknownStartPosition(_))
        );
    }

    #[test]
    fn debug_output_redacts_the_key() {
        let config = BusConfig::default().with_api_key("super-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn builds_one_dispatcher_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::new(dir.path().join("bus.log")));
        let config = BusConfig::default()
            .with_kinds([CommandKind::ShellExec, CommandKind::RemoteCall])
            .with_api_key("k");

        let dispatchers = config.build_dispatchers(&store, &new_cancel_signal()).unwrap();

        let labels: Vec<String> = dispatchers.iter().map(Dispatcher::label).collect();
        assert_eq!(labels, vec!["SHELL", "REMOTE"]);
    }

    #[test]
    fn building_remote_dispatcher_without_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::new(dir.path().join("bus.log")));
        let config = BusConfig::default().with_kinds([CommandKind::RemoteCall]);

        assert_matches!(
            config.build_dispatchers(&store, &new_cancel_signal()),
            Err(ConfigError::MissingCredential)
        );
        assert_matches!(
            BusConfig::default()
                .with_kinds([])
                .build_dispatchers(&store, &new_cancel_signal()),
            Err(ConfigError::NoKinds)
        );
    }
}
