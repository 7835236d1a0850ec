pub mod error;
pub mod import;
pub mod orchestrator;
pub mod poller;
pub mod selection;
pub mod signals;
pub mod traits;
pub mod trends;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{ReviewError, Result, Severity};
pub use import::{ImportFlow, ImportState};
pub use orchestrator::{ReviewProgress, ReviewSession, SessionNotice, SessionPhase};
pub use poller::{PollSnapshot, RefreshOutcome, StatusCoordinator};
pub use selection::{CandidateSelection, RankedCandidate};
pub use signals::{QueueHead, SignalAccess};
pub use traits::{BackendResult, ReviewBackend, ReviewContext};
pub use trends::TrendEngine;
