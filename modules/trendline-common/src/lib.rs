pub mod config;
pub mod error;
pub mod lifecycle;
pub mod processing;
pub mod score;
pub mod types;

pub use config::Config;
pub use error::{BackendError, ConfigError, LifecycleError};
pub use lifecycle::{
    apply_signal_patch, apply_trend_patch, validate_signal_patch, validate_trend_patch, SignalPatch,
    TrendPatch,
};
pub use processing::{PipelinePhase, ProcessingStatus};
pub use score::{normalize_score, score_percent, ScoreScale};
pub use types::*;
