use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;

use crate::config::ChatApiConfig;
use crate::error::ChatApiError;
use crate::payload::{ChatCompletion, ChatRequest, ChatResponseBody};
use crate::url::normalize_chat_url;

/// Optional cancellation signal shared with the caller's watch loop.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct ChatApiClient {
    http: Client,
    config: ChatApiConfig,
}

impl ChatApiClient {
    pub fn new(config: ChatApiConfig) -> Result<Self, ChatApiError> {
        if config.api_key.trim().is_empty() {
            return Err(ChatApiError::MissingApiKey);
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ChatApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ChatApiConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_chat_url(&self.config.base_url)
    }

    pub fn build_headers(&self) -> Result<HeaderMap, ChatApiError> {
        let mut out = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key.trim()))
            .map_err(|_| ChatApiError::InvalidHeader("authorization".to_string()))?;
        out.insert(AUTHORIZATION, bearer);
        out.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(user_agent) = self.config.user_agent.as_deref() {
            out.insert(
                USER_AGENT,
                HeaderValue::from_str(user_agent)
                    .map_err(|_| ChatApiError::InvalidHeader("user-agent".to_string()))?,
            );
        }

        for (key, value) in &self.config.extra_headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| ChatApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(value).map_err(|_| {
                    ChatApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    /// The request body for a single user turn with the configured model.
    pub fn request_for(&self, content: &str) -> ChatRequest {
        ChatRequest::single_user_turn(&self.config.model, content, self.config.temperature)
    }

    pub fn build_request(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::RequestBuilder, ChatApiError> {
        let headers = self.build_headers()?;
        Ok(self
            .http
            .post(self.normalized_endpoint())
            .headers(headers)
            .json(request))
    }

    /// Sends one request and returns the first choice's assistant content.
    ///
    /// Exactly one attempt is made. Non-2xx responses become
    /// [`ChatApiError::Status`]; a 2xx body without a non-empty assistant
    /// message becomes [`ChatApiError::MalformedResponse`].
    pub async fn complete(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<ChatCompletion, ChatApiError> {
        if is_cancelled(cancellation) {
            return Err(ChatApiError::Cancelled);
        }

        let response = self.build_request(request)?.send();
        let response = await_or_cancel(response, cancellation).await??;
        let status = response.status();
        let body = await_or_cancel(response.text(), cancellation).await??;

        if !status.is_success() {
            return Err(ChatApiError::from_status(status, body));
        }

        parse_completion(body)
    }
}

/// Extracts the assistant content from a 2xx response body.
pub fn parse_completion(body: String) -> Result<ChatCompletion, ChatApiError> {
    let parsed = match serde_json::from_str::<ChatResponseBody>(&body) {
        Ok(parsed) => parsed,
        Err(error) => {
            return Err(ChatApiError::MalformedResponse {
                reason: format!("response is not a chat completion: {error}"),
                body,
            });
        }
    };

    match parsed.first_content() {
        Some(content) => Ok(ChatCompletion {
            content: content.to_string(),
            raw_body: body,
        }),
        None => Err(ChatApiError::MalformedResponse {
            reason: "response has no assistant message content".to_string(),
            body,
        }),
    }
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, ChatApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(ChatApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
