use std::time::Duration;

use thiserror::Error;
use voxbot_core::Retryable;

/// Errors returned by chat transport calls.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Network error: {0}")]
    Network(reqwest::Error),

    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

// Request URLs carry the bot token, so they never make it into error text.
impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return ChatError::Malformed(e.without_url().to_string());
        }
        ChatError::Network(e.without_url())
    }
}

impl Retryable for ChatError {
    fn is_retryable(&self) -> bool {
        match self {
            ChatError::Network(e) => !e.is_builder() && !e.is_redirect(),
            ChatError::Server { .. } | ChatError::RateLimited { .. } | ChatError::Malformed(_) => {
                true
            }
            ChatError::Api { code, .. } => *code >= 500,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ChatError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type for chat operations.
pub type Result<T> = std::result::Result<T, ChatError>;
