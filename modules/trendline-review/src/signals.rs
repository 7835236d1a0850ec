//! Signal reads and writes, and the next-unassigned queue head.

use tracing::{info, warn};

use trendline_common::{
    validate_signal_patch, NewSignal, Signal, SignalFilter, SignalId, SignalPage, SignalPatch,
    SignalStatus,
};

use crate::error::{ReviewError, Result};
use crate::selection::CandidateSelection;
use crate::traits::ReviewContext;

/// Front of the review queue. `selection` is `None` when no Pending signal
/// other than the excluded one is left.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueHead {
    pub selection: Option<CandidateSelection>,
    pub remaining_count: u32,
}

impl QueueHead {
    pub fn is_exhausted(&self) -> bool {
        self.selection.is_none()
    }
}

pub struct SignalAccess {
    ctx: ReviewContext,
}

impl SignalAccess {
    pub fn new(ctx: ReviewContext) -> Self {
        Self { ctx }
    }

    pub async fn list(&self, filter: &SignalFilter) -> Result<SignalPage> {
        Ok(self.ctx.backend.list_signals(self.ctx.project_id, filter).await?)
    }

    pub async fn get(&self, id: SignalId) -> Result<Signal> {
        Ok(self.ctx.backend.get_signal(id).await?)
    }

    pub async fn create(&self, signal: &NewSignal) -> Result<Signal> {
        if signal.original_text.trim().is_empty() {
            return Err(ReviewError::Validation("signal text cannot be empty".into()));
        }
        let created = self.ctx.backend.create_signal(self.ctx.project_id, signal).await?;
        info!(signal_id = %created.id, "Signal created");
        Ok(created)
    }

    /// Validate against the stored signal, then update. A rejected patch issues no write.
    pub async fn update(&self, id: SignalId, patch: &SignalPatch) -> Result<Signal> {
        if patch.is_empty() {
            return self.get(id).await;
        }
        let current = self.get(id).await?;
        let effective = validate_signal_patch(&current, patch)?;
        Ok(self.ctx.backend.update_signal(id, &effective).await?)
    }

    /// Archive with a mandatory justification.
    pub async fn archive(&self, id: SignalId, note: &str) -> Result<Signal> {
        if note.trim().is_empty() {
            return Err(ReviewError::Validation(
                "a note is required to archive a signal".into(),
            ));
        }
        let archived = self.update(id, &SignalPatch::archive(note.trim())).await?;
        info!(signal_id = %id, "Signal archived");
        Ok(archived)
    }

    /// Bring an archived signal back into the review queue.
    pub async fn restore(&self, id: SignalId) -> Result<Signal> {
        let current = self.get(id).await?;
        if current.status != SignalStatus::Archived {
            return Err(ReviewError::InvalidState(format!(
                "only archived signals can be restored; this one is {}",
                current.status
            )));
        }
        Ok(self.ctx.backend.update_signal(id, &SignalPatch::release()).await?)
    }

    pub async fn delete(&self, id: SignalId) -> Result<()> {
        self.ctx.backend.delete_signal(id).await?;
        info!(signal_id = %id, "Signal deleted");
        Ok(())
    }

    /// Read-only: the next Pending signal other than `exclude_id`, with ranked candidates.
    pub async fn next_unassigned(&self, exclude_id: Option<SignalId>) -> Result<QueueHead> {
        let next = self
            .ctx
            .backend
            .next_unassigned(self.ctx.project_id, exclude_id)
            .await?;

        let selection = match next.signal {
            Some(signal) if exclude_id == Some(signal.id) => {
                warn!(signal_id = %signal.id, "Backend returned the excluded signal, ignoring it");
                None
            }
            Some(signal) => Some(CandidateSelection::new(signal, next.similar_signals)),
            None => None,
        };

        Ok(QueueHead {
            selection,
            remaining_count: next.remaining_count,
        })
    }
}
