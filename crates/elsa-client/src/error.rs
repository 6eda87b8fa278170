use elsa_core::FailureReason;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Could not parse responseText: {0}")]
    Json(#[from] serde_json::Error),

    /// `{error: ...}` in an otherwise successful response.
    #[error("{0}")]
    Server(String),

    #[error("No response text")]
    EmptyResponse,

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("failed to read config {path}: {message}")]
    Config { path: String, message: String },
}

impl ClientError {
    /// How a failed session request is recorded.
    pub fn into_failure(self) -> FailureReason {
        match self {
            Self::Http(e) if e.is_timeout() => FailureReason::Timeout,
            Self::Http(e) => FailureReason::Transport(e.to_string()),
            Self::Server(msg) => FailureReason::Server(msg),
            Self::EmptyResponse => FailureReason::EmptyResponse,
            Self::Json(e) => FailureReason::Malformed(format!("Could not parse responseText: {}", e)),
            Self::Unexpected(msg) => FailureReason::Malformed(msg),
            Self::Config { message, .. } => FailureReason::Transport(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
