//! Transport-only chat-completion client primitives.
//!
//! This crate owns request building and response parsing for an
//! OpenAI-compatible `/chat/completions` endpoint. It contains no credential
//! loading and no retry loop: a call is one attempt, and the caller decides
//! whether a failure is worth another one via [`ChatApiError::is_transient`].

pub mod client;
pub mod config;
pub mod error;
pub mod payload;
pub mod retry;
pub mod url;

pub use client::{CancellationSignal, ChatApiClient};
pub use config::ChatApiConfig;
pub use error::ChatApiError;
pub use payload::{ChatCompletion, ChatMessage, ChatRequest};
pub use url::normalize_chat_url;
