//! Trend assembly and lifecycle.
//!
//! Creation is two steps against the backend: create the draft trend, then
//! link each member. A failure in the first step leaves everything as it
//! was. A failure in the second leaves a trend with missing members, which
//! is reported as `ReviewError::Inconsistency` and never rolled back here.

use std::collections::HashSet;

use tracing::{error, info, warn};

use trendline_common::{
    validate_trend_patch, NewTrend, Signal, SignalId, SignalPatch, Trend, TrendDetail, TrendId,
    TrendPatch, TrendStatus,
};

use crate::error::{ReviewError, Result};
use crate::traits::ReviewContext;

pub struct TrendEngine {
    ctx: ReviewContext,
}

impl TrendEngine {
    pub fn new(ctx: ReviewContext) -> Self {
        Self { ctx }
    }

    pub async fn list(&self, include_archived: bool) -> Result<Vec<Trend>> {
        Ok(self
            .ctx
            .backend
            .list_trends(self.ctx.project_id, include_archived)
            .await?)
    }

    pub async fn get(&self, id: TrendId) -> Result<TrendDetail> {
        Ok(self.ctx.backend.get_trend(id).await?)
    }

    /// Create one draft trend from `signal_ids` and link every member to it.
    ///
    /// A single signal is a valid trend. Every listed signal must be Pending.
    pub async fn create_trend(&self, signal_ids: &[SignalId]) -> Result<TrendDetail> {
        let ids = dedup(signal_ids);
        if ids.is_empty() {
            return Err(ReviewError::Validation(
                "select at least one signal to create a trend".into(),
            ));
        }
        self.ensure_pending(&ids).await?;

        let trend = self
            .ctx
            .backend
            .create_trend(
                self.ctx.project_id,
                &NewTrend {
                    signal_ids: ids.clone(),
                },
            )
            .await?;
        info!(trend_id = %trend.id, members = ids.len(), "Trend created");

        let members = self.link_members(trend.id, &ids).await?;
        Ok(TrendDetail {
            trend: Trend {
                signal_count: members.len() as u32,
                ..trend
            },
            members,
        })
    }

    /// Link more Pending signals to an existing active trend.
    pub async fn add_signals(&self, trend_id: TrendId, signal_ids: &[SignalId]) -> Result<TrendDetail> {
        let ids = dedup(signal_ids);
        if ids.is_empty() {
            return Err(ReviewError::Validation("no signals to add".into()));
        }
        let current = self.get(trend_id).await?;
        ensure_editable(&current.trend)?;
        self.ensure_pending(&ids).await?;

        self.link_members(trend_id, &ids).await?;
        self.get(trend_id).await
    }

    async fn ensure_pending(&self, ids: &[SignalId]) -> Result<()> {
        for id in ids {
            let signal = self.ctx.backend.get_signal(*id).await?;
            if !signal.is_pending() {
                return Err(ReviewError::TerminalState(format!(
                    "\"{}\" is {} and cannot join a trend",
                    signal.display_title(),
                    signal.status
                )));
            }
        }
        Ok(())
    }

    /// Flip every member to Combined. Keeps going past failures so the
    /// inconsistency report names every unlinked signal.
    async fn link_members(&self, trend_id: TrendId, ids: &[SignalId]) -> Result<Vec<Signal>> {
        let patch = SignalPatch::combine_into(trend_id);
        let mut linked = Vec::with_capacity(ids.len());
        let mut unflipped = Vec::new();
        let mut first_error = None;

        for id in ids {
            match self.ctx.backend.update_signal(*id, &patch).await {
                Ok(signal) => linked.push(signal),
                Err(e) => {
                    warn!(trend_id = %trend_id, signal_id = %id, error = %e, "Failed to link signal to trend");
                    first_error.get_or_insert_with(|| e.to_string());
                    unflipped.push(*id);
                }
            }
        }

        if let Some(message) = first_error {
            error!(
                trend_id = %trend_id,
                linked = linked.len(),
                unlinked = unflipped.len(),
                "Trend membership is inconsistent and needs manual reconciliation"
            );
            return Err(ReviewError::Inconsistency {
                trend_id,
                unflipped,
                message,
            });
        }
        Ok(linked)
    }

    /// Apply a partial update. The whole patch is validated first; a status
    /// equal to the current one is ignored.
    pub async fn update_trend(&self, id: TrendId, patch: &TrendPatch) -> Result<Trend> {
        let current = self.get(id).await?;
        let effective = validate_trend_patch(&current.trend, patch)?;
        if effective.is_empty() {
            return Ok(current.trend);
        }

        let updated = self.ctx.backend.update_trend(id, &effective).await?;
        if effective.status.is_some() {
            info!(trend_id = %id, from = %current.trend.status, to = %updated.status, "Trend status changed");
        }
        Ok(updated)
    }

    pub async fn finalize(&self, id: TrendId) -> Result<Trend> {
        self.update_trend(id, &TrendPatch::status(TrendStatus::Final)).await
    }

    pub async fn retire(&self, id: TrendId, note: &str) -> Result<Trend> {
        self.close(id, TrendStatus::Retired, note).await
    }

    pub async fn archive(&self, id: TrendId, note: &str) -> Result<Trend> {
        self.close(id, TrendStatus::Archived, note).await
    }

    async fn close(&self, id: TrendId, status: TrendStatus, note: &str) -> Result<Trend> {
        if note.trim().is_empty() {
            return Err(ReviewError::Validation(format!(
                "a note explaining why is required to mark a trend {status}"
            )));
        }
        self.update_trend(id, &TrendPatch::status(status).with_note(note.trim()))
            .await
    }

    /// Release every member to Pending and drop the trend. Draft or final only.
    pub async fn undo(&self, id: TrendId) -> Result<()> {
        let current = self.get(id).await?;
        if current.trend.status.is_terminal() {
            return Err(ReviewError::TerminalState(format!(
                "a {} trend cannot be undone",
                current.trend.status
            )));
        }
        self.ctx.backend.undo_trend(id).await?;
        info!(trend_id = %id, released = current.members.len(), "Trend undone");
        Ok(())
    }

    pub async fn delete(&self, id: TrendId) -> Result<()> {
        self.ctx.backend.delete_trend(id).await?;
        info!(trend_id = %id, "Trend deleted");
        Ok(())
    }

    /// Ask the summarizer for a new title and summary and store both. If the
    /// summarizer fails nothing is written.
    pub async fn regenerate_summary(&self, id: TrendId) -> Result<Trend> {
        let current = self.get(id).await?;
        ensure_editable(&current.trend)?;

        let fresh = self.ctx.backend.regenerate_trend_summary(id).await?;
        let patch = TrendPatch {
            title: Some(fresh.title),
            summary: Some(fresh.summary),
            ..Default::default()
        };
        self.update_trend(id, &patch).await
    }
}

fn ensure_editable(trend: &Trend) -> Result<()> {
    if trend.status.is_terminal() {
        return Err(ReviewError::TerminalState(format!(
            "trend is {}; retired and archived trends cannot be changed",
            trend.status
        )));
    }
    Ok(())
}

/// Drop repeats, keeping first-seen order.
fn dedup(ids: &[SignalId]) -> Vec<SignalId> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::MemoryBackend;
    use trendline_common::{BackendError, SignalStatus};

    fn setup() -> (Arc<MemoryBackend>, TrendEngine) {
        let backend = Arc::new(MemoryBackend::new());
        let engine = TrendEngine::new(backend.context());
        (backend, engine)
    }

    #[tokio::test]
    async fn create_links_every_member() {
        let (backend, engine) = setup();
        let s1 = backend.add_signal("Heat pump rebates");
        let s2 = backend.add_signal("Gas stove bans");

        let detail = engine.create_trend(&[s1.id, s2.id]).await.unwrap();
        assert_eq!(detail.trend.status, TrendStatus::Draft);
        assert_eq!(detail.trend.signal_count, 2);
        assert!(!detail.trend.summary.is_empty());

        for id in [s1.id, s2.id] {
            let s = backend.signal(id).unwrap();
            assert_eq!(s.status, SignalStatus::Combined);
            assert_eq!(s.trend_id, Some(detail.trend.id));
        }
        assert_eq!(backend.trend(detail.trend.id).unwrap().signal_count, 2);
        backend.assert_invariants();
    }

    #[tokio::test]
    async fn single_signal_trend() {
        let (backend, engine) = setup();
        let s = backend.add_signal("Lone but important");
        let detail = engine.create_trend(&[s.id]).await.unwrap();
        assert_eq!(detail.trend.signal_count, 1);
        assert_eq!(detail.members.len(), 1);
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let (backend, engine) = setup();
        assert!(matches!(
            engine.create_trend(&[]).await,
            Err(ReviewError::Validation(_))
        ));
        assert_eq!(backend.calls("create_trend"), 0);
    }

    #[tokio::test]
    async fn combined_signal_is_rejected_preflight() {
        let (backend, engine) = setup();
        let s1 = backend.add_signal("one");
        let s2 = backend.add_signal("two");
        engine.create_trend(&[s1.id]).await.unwrap();

        let err = engine.create_trend(&[s2.id, s1.id]).await.unwrap_err();
        assert!(matches!(err, ReviewError::TerminalState(_)));
        assert_eq!(backend.calls("create_trend"), 1);
        assert!(backend.signal(s2.id).unwrap().is_pending());
    }

    #[tokio::test]
    async fn failed_creation_mutates_nothing() {
        let (backend, engine) = setup();
        let s1 = backend.add_signal("one");
        backend.fail_next("create_trend", BackendError::Transport("summarizer unavailable".into()));

        let err = engine.create_trend(&[s1.id]).await.unwrap_err();
        assert_eq!(err.user_message(), "summarizer unavailable");
        assert!(backend.trends().is_empty());
        assert_eq!(backend.calls("update_signal"), 0);
        assert!(backend.signal(s1.id).unwrap().is_pending());
    }

    #[tokio::test]
    async fn failed_member_flip_is_an_inconsistency() {
        let (backend, engine) = setup();
        let s1 = backend.add_signal("one");
        let s2 = backend.add_signal("two");
        let s3 = backend.add_signal("three");
        backend.fail_member_flip_for(s2.id);

        let err = engine.create_trend(&[s1.id, s2.id, s3.id]).await.unwrap_err();
        let ReviewError::Inconsistency { trend_id, unflipped, .. } = err else {
            panic!("expected inconsistency, got {err:?}");
        };
        assert_eq!(unflipped, vec![s2.id]);
        // no compensating rollback
        let trend = backend.trend(trend_id).unwrap();
        assert_eq!(trend.signal_count, 2);
        assert_eq!(backend.signal(s3.id).unwrap().trend_id, Some(trend_id));
        assert!(backend.signal(s2.id).unwrap().is_pending());
        backend.assert_invariants();
    }

    #[tokio::test]
    async fn archive_with_empty_note_leaves_trend_alone() {
        let (backend, engine) = setup();
        let s = backend.add_signal("x");
        let detail = engine.create_trend(&[s.id]).await.unwrap();

        let patch = TrendPatch::status(TrendStatus::Archived).with_note("");
        let err = engine.update_trend(detail.trend.id, &patch).await.unwrap_err();
        assert!(matches!(err, ReviewError::Validation(_)));
        assert_eq!(backend.trend(detail.trend.id).unwrap().status, TrendStatus::Draft);
        assert_eq!(backend.calls("update_trend"), 0);

        assert!(engine.retire(detail.trend.id, " ").await.is_err());
        assert_eq!(backend.calls("get_trend"), 1);
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let (backend, engine) = setup();
        let s = backend.add_signal("x");
        let id = engine.create_trend(&[s.id]).await.unwrap().trend.id;

        let finalized = engine.finalize(id).await.unwrap();
        assert_eq!(finalized.status, TrendStatus::Final);

        let retired = engine.retire(id, "superseded by broader trend").await.unwrap();
        assert_eq!(retired.status, TrendStatus::Retired);
        assert_eq!(retired.note.as_deref(), Some("superseded by broader trend"));

        for attempt in [
            engine.finalize(id).await,
            engine.archive(id, "again").await,
            engine
                .update_trend(id, &TrendPatch { title: Some("New".into()), ..Default::default() })
                .await,
        ] {
            assert!(matches!(attempt, Err(ReviewError::TerminalState(_))));
        }
        assert!(matches!(engine.undo(id).await, Err(ReviewError::TerminalState(_))));
        assert_eq!(backend.trend(id).unwrap().status, TrendStatus::Retired);

        assert!(engine.list(false).await.unwrap().is_empty());
        assert_eq!(engine.list(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_status_update_is_a_noop() {
        let (backend, engine) = setup();
        let s = backend.add_signal("x");
        let id = engine.create_trend(&[s.id]).await.unwrap().trend.id;

        let unchanged = engine.update_trend(id, &TrendPatch::status(TrendStatus::Draft)).await.unwrap();
        assert_eq!(unchanged.status, TrendStatus::Draft);
        assert_eq!(backend.calls("update_trend"), 0);
    }

    #[tokio::test]
    async fn undo_releases_members() {
        let (backend, engine) = setup();
        let s1 = backend.add_signal("one");
        let s2 = backend.add_signal("two");
        let id = engine.create_trend(&[s1.id, s2.id]).await.unwrap().trend.id;

        engine.undo(id).await.unwrap();
        for s in [s1.id, s2.id] {
            let signal = backend.signal(s).unwrap();
            assert!(signal.is_pending());
            assert_eq!(signal.trend_id, None);
        }
        assert!(backend.trend(id).is_none());
        assert!(engine.list(true).await.unwrap().is_empty());
        backend.assert_invariants();
    }

    #[tokio::test]
    async fn regenerate_failure_stores_nothing() {
        let (backend, engine) = setup();
        let s = backend.add_signal("x");
        let detail = engine.create_trend(&[s.id]).await.unwrap();
        backend.fail_next("regenerate_trend_summary", BackendError::Transport("model overloaded".into()));

        assert!(engine.regenerate_summary(detail.trend.id).await.is_err());
        let stored = backend.trend(detail.trend.id).unwrap();
        assert_eq!(stored.summary, detail.trend.summary);
        assert_eq!(backend.calls("update_trend"), 0);

        let regenerated = engine.regenerate_summary(detail.trend.id).await.unwrap();
        assert!(regenerated.summary.starts_with("Regenerated"));
    }

    #[tokio::test]
    async fn add_signals_to_existing_trend() {
        let (backend, engine) = setup();
        let s1 = backend.add_signal("one");
        let s2 = backend.add_signal("two");
        let id = engine.create_trend(&[s1.id]).await.unwrap().trend.id;

        let detail = engine.add_signals(id, &[s2.id, s2.id]).await.unwrap();
        assert_eq!(detail.trend.signal_count, 2);
        assert_eq!(detail.members.len(), 2);
    }

    #[tokio::test]
    async fn delete_releases_members() {
        let (backend, engine) = setup();
        let s = backend.add_signal("x");
        let id = engine.create_trend(&[s.id]).await.unwrap().trend.id;
        engine.archive(id, "out of scope").await.unwrap();

        engine.delete(id).await.unwrap();
        assert!(backend.signal(s.id).unwrap().is_pending());
        backend.assert_invariants();
    }
}
