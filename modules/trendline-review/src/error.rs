use thiserror::Error;

use trendline_common::{BackendError, LifecycleError, SignalId, TrendId};

pub type Result<T> = std::result::Result<T, ReviewError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReviewError {
    /// Missing note, empty title, empty selection. Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// Editing a retired or archived trend, or reusing an already combined signal.
    #[error("{0}")]
    TerminalState(String),

    /// The action does not apply to the session's current phase.
    #[error("{0}")]
    InvalidState(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The trend exists but some members were never linked to it. No rollback
    /// is attempted; the trend and `unflipped` need manual reconciliation.
    #[error(
        "trend {trend_id} was created but {} signal(s) could not be linked to it: {message}",
        unflipped.len()
    )]
    Inconsistency {
        trend_id: TrendId,
        unflipped: Vec<SignalId>,
        message: String,
    },
}

impl From<LifecycleError> for ReviewError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Validation(msg) => ReviewError::Validation(msg),
            LifecycleError::TerminalState(msg) => ReviewError::TerminalState(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl ReviewError {
    pub fn severity(&self) -> Severity {
        match self {
            ReviewError::Inconsistency { .. } => Severity::Error,
            ReviewError::Backend(BackendError::Transport(_)) => Severity::Error,
            _ => Severity::Warning,
        }
    }

    /// Safe to retry without reconciling anything first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReviewError::Backend(e) if e.is_transient())
    }

    /// Message shown to the analyst at the session boundary.
    pub fn user_message(&self) -> String {
        match self {
            ReviewError::Validation(msg)
            | ReviewError::TerminalState(msg)
            | ReviewError::InvalidState(msg) => msg.clone(),
            ReviewError::Backend(BackendError::RateLimited) => {
                "The server is busy right now. Please try again in a moment.".to_string()
            }
            ReviewError::Backend(BackendError::NotFound(what)) => {
                format!("{what} no longer exists. Reload to continue.")
            }
            ReviewError::Backend(BackendError::Rejected(msg)) => msg.clone(),
            ReviewError::Backend(BackendError::Transport(msg)) => msg.clone(),
            ReviewError::Inconsistency {
                trend_id,
                unflipped,
                message,
            } => format!(
                "Trend {trend_id} was created, but {} signal(s) were not added to it ({message}). \
                 Open the trend and add them manually before continuing.",
                unflipped.len()
            ),
        }
    }
}
