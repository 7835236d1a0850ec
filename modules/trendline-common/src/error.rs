use thiserror::Error;

/// Failure reported by any backend collaborator operation.
///
/// `Transport` carries the collaborator's message verbatim so the step that
/// initiated the call can show it unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("rate limited, try again shortly")]
    RateLimited,

    #[error("{0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, BackendError::RateLimited)
    }

    /// Transport failures and rate limits leave no state behind and may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::RateLimited | BackendError::Transport(_))
    }
}

/// A patch that breaks a signal or trend rule. Raised before anything is mutated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    TerminalState(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{key} must be a number, got {value:?}")]
    Invalid { key: &'static str, value: String },
}
