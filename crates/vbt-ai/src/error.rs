//! Error types for the AI service boundary.

use thiserror::Error;

/// Errors raised by an AI service call.
///
/// These never leave the resolvers in this crate: every one of them turns
/// into a fallback outcome.
#[derive(Debug, Error)]
pub enum AiError {
    /// The request did not reach the service or no response came back.
    #[error("AI service transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("AI service returned status {status}")]
    Status { status: u16 },

    /// The response body did not match the service contract.
    #[error("Malformed AI response: {0}")]
    MalformedResponse(String),

    /// The service reported itself unavailable, or panicked.
    #[error("AI service unavailable: {0}")]
    Unavailable(String),

    /// The frame could not be encoded for transmission.
    #[error("Frame encoding error: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for AiError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(err.to_string())
    }
}

/// Result type alias for AI operations.
pub type AiResult<T> = std::result::Result<T, AiError>;
