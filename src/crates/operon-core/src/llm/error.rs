//! Error types for model provider interactions.

use crate::error::CoreError;
use thiserror::Error;

/// Result type for provider operations.
pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Errors surfaced by model providers.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No registered provider claims the model.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Provider service unreachable or down.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Provider returned a malformed response.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Request deadline exceeded.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// General provider failure, optionally with an HTTP-ish status.
    #[error("Provider error{}: {message}", status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Provider {
        /// Status code when the provider reported one.
        status: Option<u16>,
        /// Failure description.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether a retry wrapper may reasonably re-attempt the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::ServiceUnavailable(_)
                | LlmError::RateLimitExceeded(_)
                | LlmError::Timeout(_)
                | LlmError::Provider { .. }
        )
    }
}

impl From<LlmError> for CoreError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::ModelNotFound(model) => CoreError::UnknownOperator(model),
            LlmError::Timeout(message) => CoreError::Timeout {
                operation: message,
                duration_ms: 0,
            },
            LlmError::Provider { status, message } => CoreError::Provider { status, message },
            other => CoreError::Provider {
                status: None,
                message: other.to_string(),
            },
        }
    }
}
