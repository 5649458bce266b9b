use crate::types::{ChatCompletionChunk, ChatRequest, ChatResponse};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limit exceeded: {body}")]
    RateLimit { body: String },

    #[error("Authentication failed")]
    Authentication,

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Malformed stream chunk: {message}")]
    MalformedChunk { message: String },

    #[error("Stream error: {message}")]
    Stream { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl ModelError {
    /// Maps a non-2xx HTTP status and its body to an error.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit { body },
            503 => Self::ServiceUnavailable { message: body },
            _ => Self::Api { status, body },
        }
    }

    /// Whether the HTTP client may transparently retry the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(err) => err.is_connect() || err.is_timeout(),
            Self::Timeout | Self::RateLimit { .. } | Self::ServiceUnavailable { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Ordered partial-response events of one streaming call.
pub type ChunkStream = Pin<Box<dyn Stream<Item = ModelResult<ChatCompletionChunk>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> ModelResult<ChatResponse>;

    async fn chat_stream(&self, request: &ChatRequest) -> ModelResult<ChunkStream>;

    fn provider_name(&self) -> &'static str;
}
