use std::fmt;
use std::time::{Duration, Instant};

use chat_api::{ChatApiClient, ChatApiConfig, ChatApiError};
use tracing::{debug, warn};

use super::{ExecutionResult, Executor, FailureKind, FAILURE_EXIT_CODE};
use crate::cancel::CancelSignal;
use crate::recognizer::{Command, CommandKind};

pub const REMOTE_SOURCE: &str = "REMOTE";

/// Error returned while constructing a remote executor.
#[derive(Debug)]
pub struct RemoteInitError {
    message: String,
}

impl RemoteInitError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RemoteInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RemoteInitError {}

/// Sends the remote-call payload as a single user turn to a chat-completion
/// endpoint and records the assistant reply.
pub struct RemoteCallExecutor {
    client: ChatApiClient,
    runtime: tokio::runtime::Runtime,
    source: String,
}

impl fmt::Debug for RemoteCallExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCallExecutor")
            .field("endpoint", &self.client.normalized_endpoint())
            .field("model", &self.client.config().model)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl RemoteCallExecutor {
    pub fn new(config: ChatApiConfig) -> Result<Self, RemoteInitError> {
        let client = ChatApiClient::new(config)
            .map_err(|error| RemoteInitError::new(format!("chat client: {error}")))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                RemoteInitError::new(format!("failed to initialize tokio runtime: {error}"))
            })?;

        Ok(Self {
            client,
            runtime,
            source: REMOTE_SOURCE.to_string(),
        })
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn client(&self) -> &ChatApiClient {
        &self.client
    }
}

impl Executor for RemoteCallExecutor {
    fn source(&self) -> &str {
        &self.source
    }

    fn kind(&self) -> CommandKind {
        CommandKind::RemoteCall
    }

    fn execute(&self, command: &Command, deadline: Duration, cancel: &CancelSignal) -> ExecutionResult {
        let started = Instant::now();
        let request = self.client.request_for(&command.payload);
        debug!(cmd_id = ?command.id, model = %request.model, "sending remote call");

        let outcome = self.runtime.block_on(async {
            tokio::time::timeout(deadline, self.client.complete(&request, Some(cancel))).await
        });

        match outcome {
            Err(_elapsed) => {
                warn!(cmd_id = ?command.id, "remote call hit its deadline");
                ExecutionResult::timeout(command, deadline, started)
            }
            Ok(Ok(completion)) => ExecutionResult::success(command, completion.content, 0, started),
            Ok(Err(ChatApiError::Cancelled)) => ExecutionResult::cancelled(command, started),
            Ok(Err(error)) => {
                let failure = classify(&error);
                let detail = match error.body() {
                    Some(body) => format!("{error}; body: {body}"),
                    None => error.to_string(),
                };
                ExecutionResult::failed(command, failure, detail, FAILURE_EXIT_CODE, started)
            }
        }
    }
}

fn classify(error: &ChatApiError) -> FailureKind {
    if error.is_transient() {
        return FailureKind::Transport;
    }
    match error {
        ChatApiError::MalformedResponse { .. } => FailureKind::Malformed,
        _ => FailureKind::Application,
    }
}
