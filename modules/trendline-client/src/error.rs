use thiserror::Error;
use trendline_common::BackendError;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by backend")]
    RateLimited,

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Parse(err.to_string())
    }
}

impl From<ClientError> for BackendError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::RateLimited => BackendError::RateLimited,
            ClientError::Api { status: 404, message } => BackendError::NotFound(message),
            ClientError::Api {
                status: 400 | 409 | 422,
                message,
            } => BackendError::Rejected(message),
            ClientError::Api { message, .. } => BackendError::Transport(message),
            ClientError::Network(message) | ClientError::Parse(message) => {
                BackendError::Transport(message)
            }
        }
    }
}
