//! Project-scoped review session.
//!
//! `CheckingStatus -> AwaitingSignal <-> EditingTrend`, ending in
//! `AllReviewed` once the queue is empty. Every action takes `&mut self`, so
//! a second trigger of the same action cannot start while one is awaiting.

use tracing::{error, info, warn};

use trendline_common::{ProcessingStatus, SignalId, TrendDetail, TrendId, TrendPatch};

use crate::error::{ReviewError, Result, Severity};
use crate::poller::StatusCoordinator;
use crate::selection::CandidateSelection;
use crate::signals::{QueueHead, SignalAccess};
use crate::traits::ReviewContext;
use crate::trends::TrendEngine;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    /// Waiting for the processing pipeline to finish.
    CheckingStatus,
    AwaitingSignal(CandidateSelection),
    /// A trend was just created from `selection` and is open for edits.
    EditingTrend {
        trend: TrendDetail,
        selection: CandidateSelection,
    },
    AllReviewed,
}

impl SessionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::CheckingStatus => "checking_status",
            SessionPhase::AwaitingSignal(_) => "awaiting_signal",
            SessionPhase::EditingTrend { .. } => "editing_trend",
            SessionPhase::AllReviewed => "all_reviewed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotice {
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewProgress {
    /// Signals archived or grouped during this session.
    pub reviewed: u32,
    /// Pending signals at the last queue load.
    pub remaining: u32,
}

pub struct ReviewSession {
    signals: SignalAccess,
    trends: TrendEngine,
    phase: SessionPhase,
    progress: ReviewProgress,
    notice: Option<SessionNotice>,
}

impl ReviewSession {
    pub fn new(ctx: ReviewContext) -> Self {
        Self {
            signals: SignalAccess::new(ctx.clone()),
            trends: TrendEngine::new(ctx),
            phase: SessionPhase::CheckingStatus,
            progress: ReviewProgress::default(),
            notice: None,
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn progress(&self) -> ReviewProgress {
        self.progress
    }

    pub fn notice(&self) -> Option<&SessionNotice> {
        self.notice.as_ref()
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    /// The signal under review, if any.
    pub fn current(&self) -> Option<&CandidateSelection> {
        match &self.phase {
            SessionPhase::AwaitingSignal(selection) => Some(selection),
            SessionPhase::EditingTrend { selection, .. } => Some(selection),
            _ => None,
        }
    }

    /// Unlock review once processing is complete. Returns whether it did.
    pub async fn begin(&mut self, status: &ProcessingStatus) -> Result<bool> {
        if !matches!(self.phase, SessionPhase::CheckingStatus) {
            return Err(self.reject_phase("begin"));
        }
        if !status.is_complete() {
            info!(progress = %status.progress_line(), "Processing still running, review locked");
            return Ok(false);
        }
        if status.is_error() {
            self.set_notice(
                format!(
                    "Processing stopped with an error; review continues on partial results. {}",
                    status.error_message.as_deref().unwrap_or_default()
                )
                .trim_end()
                .to_string(),
                Severity::Warning,
            );
        }
        self.load_next().await?;
        Ok(true)
    }

    /// Block on the coordinator until processing completes, then begin.
    pub async fn wait_for_processing(&mut self, coordinator: &StatusCoordinator) -> Result<()> {
        let status = coordinator.wait_until_complete().await.ok_or_else(|| {
            ReviewError::InvalidState("status polling stopped before processing finished".into())
        })?;
        self.begin(&status).await?;
        Ok(())
    }

    /// Load the queue head. Read-only; repeated calls with no mutation in
    /// between land on the same signal and ranking.
    pub async fn load_next(&mut self) -> Result<()> {
        if matches!(self.phase, SessionPhase::EditingTrend { .. }) {
            return Err(self.reject_phase("load the next signal"));
        }
        let head = self.signals.next_unassigned(None).await;
        let head = self.record(head)?;
        self.show(head);
        Ok(())
    }

    /// Move past the current signal without changing it.
    pub async fn skip(&mut self) -> Result<()> {
        let current = self.focal_id("skip")?;
        let head = self.signals.next_unassigned(Some(current)).await;
        let head = self.record(head)?;

        if head.is_exhausted() && head.remaining_count > 0 {
            self.progress.remaining = head.remaining_count;
            if let SessionPhase::AwaitingSignal(selection) = &mut self.phase {
                selection.clear();
            }
            self.set_notice("No other signal is waiting for review.".into(), Severity::Info);
            return Ok(());
        }
        self.show(head);
        Ok(())
    }

    /// Toggle a candidate into or out of the pending trend.
    pub fn toggle(&mut self, id: SignalId) -> Result<bool> {
        let SessionPhase::AwaitingSignal(selection) = &mut self.phase else {
            return Err(self.reject_phase("change the selection"));
        };
        let toggled = selection.toggle(id);
        self.record(toggled)
    }

    pub fn select_all(&mut self) -> Result<()> {
        let SessionPhase::AwaitingSignal(selection) = &mut self.phase else {
            return Err(self.reject_phase("change the selection"));
        };
        selection.select_all();
        Ok(())
    }

    /// Archive the current signal with a justification, then load the next one.
    pub async fn archive_current(&mut self, note: &str) -> Result<()> {
        let current = self.focal_id("archive")?;
        let archived = self.signals.archive(current, note).await;
        self.record(archived)?;
        self.progress.reviewed += 1;
        self.load_next().await
    }

    /// Group the current signal and the selected candidates into a new draft
    /// trend and open it in the editor.
    pub async fn create_trend(&mut self) -> Result<TrendDetail> {
        let SessionPhase::AwaitingSignal(selection) = &self.phase else {
            return Err(self.reject_phase("create a trend"));
        };
        let selection = selection.clone();
        let members = selection.member_ids();

        match self.trends.create_trend(&members).await {
            Ok(trend) => {
                info!(trend_id = %trend.trend.id, members = members.len(), "Trend opened for editing");
                self.progress.reviewed += members.len() as u32;
                self.phase = SessionPhase::EditingTrend {
                    trend: trend.clone(),
                    selection,
                };
                Ok(trend)
            }
            Err(err) => {
                let err = self.fail(err);
                if let ReviewError::Inconsistency { unflipped, .. } = &err {
                    self.progress.reviewed += (members.len() - unflipped.len()) as u32;
                    // members were partly linked; show the queue as it now is
                    if let Err(reload) = self.load_next().await {
                        warn!(error = %reload, "Reload after inconsistent trend failed");
                    }
                    // keep the inconsistency in front of the analyst
                    self.notice = Some(notice_for(&err));
                }
                Err(err)
            }
        }
    }

    /// Apply edits to the open trend and move on to the next signal. A
    /// rejected edit keeps the editor open.
    pub async fn save_trend(&mut self, patch: &TrendPatch) -> Result<()> {
        let trend_id = self.editing_trend_id("save a trend")?;
        let saved = self.trends.update_trend(trend_id, patch).await;
        self.record(saved)?;
        self.load_after_editor().await
    }

    /// Close the editor and stay on the same signal. Nothing is reloaded.
    pub fn cancel_edit(&mut self) -> Result<()> {
        let SessionPhase::EditingTrend { selection, .. } = &self.phase else {
            return Err(self.reject_phase("cancel editing"));
        };
        self.phase = SessionPhase::AwaitingSignal(selection.clone());
        Ok(())
    }

    /// Undo the trend just created from the editor and reload the queue head.
    pub async fn undo_created_trend(&mut self) -> Result<()> {
        let trend_id = self.editing_trend_id("undo a trend")?;
        let released = match &self.phase {
            SessionPhase::EditingTrend { trend, .. } => trend.members.len() as u32,
            _ => 0,
        };
        let undone = self.trends.undo(trend_id).await;
        self.record(undone)?;
        self.progress.reviewed = self.progress.reviewed.saturating_sub(released);
        self.load_after_editor().await
    }

    /// The editor's trend is settled either way; a failed reload leaves the
    /// session where `load_next` can pick up again.
    async fn load_after_editor(&mut self) -> Result<()> {
        self.phase = SessionPhase::CheckingStatus;
        let head = self.signals.next_unassigned(None).await;
        let head = self.record(head)?;
        self.show(head);
        Ok(())
    }

    fn show(&mut self, head: QueueHead) {
        self.progress.remaining = head.remaining_count;
        self.phase = match head.selection {
            Some(selection) => {
                info!(
                    signal_id = %selection.focal().id,
                    candidates = selection.candidates().len(),
                    remaining = head.remaining_count,
                    "Reviewing signal"
                );
                SessionPhase::AwaitingSignal(selection)
            }
            None => {
                info!(reviewed = self.progress.reviewed, "All signals reviewed");
                SessionPhase::AllReviewed
            }
        };
    }

    fn focal_id(&mut self, action: &str) -> Result<SignalId> {
        match &self.phase {
            SessionPhase::AwaitingSignal(selection) => Ok(selection.focal().id),
            _ => Err(self.reject_phase(action)),
        }
    }

    fn editing_trend_id(&mut self, action: &str) -> Result<TrendId> {
        match &self.phase {
            SessionPhase::EditingTrend { trend, .. } => Ok(trend.trend.id),
            _ => Err(self.reject_phase(action)),
        }
    }

    fn reject_phase(&mut self, action: &str) -> ReviewError {
        let err = ReviewError::InvalidState(format!(
            "cannot {action} while the session is {}",
            self.phase.name()
        ));
        self.fail(err)
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        result.map_err(|err| self.fail(err))
    }

    fn fail(&mut self, err: ReviewError) -> ReviewError {
        match err.severity() {
            Severity::Error => error!(phase = self.phase.name(), error = %err, "Review action failed"),
            _ => warn!(phase = self.phase.name(), error = %err, "Review action rejected"),
        }
        self.notice = Some(notice_for(&err));
        err
    }

    fn set_notice(&mut self, message: String, severity: Severity) {
        self.notice = Some(SessionNotice { message, severity });
    }
}

fn notice_for(err: &ReviewError) -> SessionNotice {
    SessionNotice {
        message: err.user_message(),
        severity: err.severity(),
    }
}
