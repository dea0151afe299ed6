use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::retry::is_retryable_http_error;

#[derive(Debug)]
pub enum ChatApiError {
    MissingApiKey,
    InvalidHeader(String),
    Request(reqwest::Error),
    Status {
        status: StatusCode,
        message: String,
        body: String,
        retryable: bool,
    },
    MalformedResponse {
        reason: String,
        body: String,
    },
    Cancelled,
}

/// Error bodies come in two shapes depending on the vendor:
/// `{"error":{"message":..,"code":..}}` and `{"code":..,"error":".."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    pub error: ErrorValue,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ErrorValue {
    Text(String),
    Fields(ErrorPayloadFields),
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayloadFields {
    pub message: Option<String>,
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
}

impl ErrorPayload {
    fn message(&self) -> Option<String> {
        match &self.error {
            ErrorValue::Text(text) => non_empty_string(text).map(str::to_owned),
            ErrorValue::Fields(fields) => fields
                .message
                .as_deref()
                .and_then(non_empty_string)
                .or_else(|| fields.code.as_deref().and_then(non_empty_string))
                .or_else(|| fields.type_.as_deref().and_then(non_empty_string))
                .map(str::to_owned),
        }
        .or_else(|| self.code.as_deref().and_then(non_empty_string).map(str::to_owned))
    }
}

impl ChatApiError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Connect, timeout and send failures plus unstructured gateway errors
    /// are transient. Builder or URL errors, a structured error body and a
    /// malformed success body are final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(error) => error.is_connect() || error.is_timeout() || error.is_request(),
            Self::Status { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Raw response body when the failure carried one.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } | Self::MalformedResponse { body, .. } => Some(body),
            _ => None,
        }
    }

    pub(crate) fn from_status(status: StatusCode, body: String) -> Self {
        let structured = serde_json::from_str::<ErrorPayload>(&body)
            .ok()
            .and_then(|payload| payload.message());
        let retryable = structured.is_none() && is_retryable_http_error(status.as_u16(), &body);
        let message = structured.unwrap_or_else(|| fallback_message(status, &body));

        Self::Status {
            status,
            message,
            body,
            retryable,
        }
    }
}

impl fmt::Display for ChatApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingApiKey => write!(f, "API key is required"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status {
                status, message, ..
            } => write!(f, "HTTP {status} {message}"),
            Self::MalformedResponse { reason, .. } => write!(f, "malformed response: {reason}"),
            Self::Cancelled => write!(f, "request was cancelled"),
        }
    }
}

impl std::error::Error for ChatApiError {}

impl From<reqwest::Error> for ChatApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

/// Human-readable message for a failed response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.message())
        .unwrap_or_else(|| fallback_message(status, body))
}

fn fallback_message(status: StatusCode, body: &str) -> String {
    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

fn non_empty_string(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
