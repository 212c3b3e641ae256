//! Speech client error types.

use thiserror::Error;

/// Result type for speech operations.
pub type SpeechResult<T> = Result<T, SpeechError>;

/// Errors that can occur talking to the speech service.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("speech service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeechError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn status(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Self::Status {
            status: status.as_u16(),
            body: body.into(),
        }
    }
}
