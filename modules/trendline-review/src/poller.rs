//! Processing-status coordinator.
//!
//! One immediate fetch on activation, then one per interval until the
//! completion predicate holds. Fetches are serialized: a tick that lands
//! while a fetch is in flight is skipped. Shutdown cancels the loop and any
//! result that arrives afterwards is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trendline_common::{BackendError, ProcessingStatus, ProjectId};

use crate::error::Result;
use crate::traits::{ReviewBackend, ReviewContext};

/// What observers see. `error` holds the last non-rate-limit failure and is
/// cleared by the next successful fetch; `status` keeps the last good value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollSnapshot {
    pub status: Option<ProcessingStatus>,
    pub error: Option<String>,
    pub complete: bool,
    pub polling: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    /// Rate limited. Snapshot untouched, no error recorded.
    RateLimited,
    Failed,
    /// Another fetch was already in flight.
    Skipped,
    /// The coordinator was shut down before the response arrived.
    Discarded,
}

struct Shared {
    backend: Arc<dyn ReviewBackend>,
    project_id: ProjectId,
    snapshot: watch::Sender<PollSnapshot>,
    in_flight: AtomicBool,
    cancel: CancellationToken,
}

/// Resets the in-flight flag on every exit path.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Shared {
    async fn refresh(&self) -> RefreshOutcome {
        if self.cancel.is_cancelled() {
            return RefreshOutcome::Discarded;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(project_id = %self.project_id, "Status fetch already in flight, skipping");
            return RefreshOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return RefreshOutcome::Discarded,
            r = self.backend.processing_status(self.project_id) => r,
        };

        if self.cancel.is_cancelled() {
            return RefreshOutcome::Discarded;
        }

        match result {
            Ok(status) => {
                let complete = status.is_complete();
                debug!(
                    project_id = %self.project_id,
                    phase = %status.status,
                    complete,
                    "Processing status updated"
                );
                self.snapshot.send_modify(|s| {
                    s.status = Some(status);
                    s.error = None;
                    s.complete = complete;
                });
                RefreshOutcome::Updated
            }
            Err(BackendError::RateLimited) => {
                debug!(project_id = %self.project_id, "Status fetch rate limited, waiting for next tick");
                RefreshOutcome::RateLimited
            }
            Err(e) => {
                warn!(project_id = %self.project_id, error = %e, "Status fetch failed");
                self.snapshot.send_modify(|s| s.error = Some(e.to_string()));
                RefreshOutcome::Failed
            }
        }
    }

    fn set_polling(&self, polling: bool) {
        if !self.cancel.is_cancelled() {
            self.snapshot.send_modify(|s| s.polling = polling);
        }
    }
}

async fn poll_loop(shared: Arc<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    shared.set_polling(true);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shared.cancel.cancelled() => {
                debug!(project_id = %shared.project_id, "Status polling cancelled");
                return;
            }
        }

        let outcome = shared.refresh().await;

        if shared.cancel.is_cancelled() {
            return;
        }
        if outcome == RefreshOutcome::Updated && shared.snapshot.borrow().complete {
            info!(project_id = %shared.project_id, "Processing complete, polling stopped");
            break;
        }
    }

    shared.set_polling(false);
}

pub struct StatusCoordinator {
    shared: Arc<Shared>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl StatusCoordinator {
    pub fn new(ctx: &ReviewContext, interval: Duration) -> Self {
        let (snapshot, _) = watch::channel(PollSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                backend: ctx.backend.clone(),
                project_id: ctx.project_id,
                snapshot,
                in_flight: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
            interval,
            task: None,
        }
    }

    /// Start polling. A no-op while a loop is running or after shutdown.
    pub fn activate(&mut self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        info!(
            project_id = %self.shared.project_id,
            interval_secs = self.interval.as_secs_f64(),
            "Status polling started"
        );
        self.task = Some(tokio::spawn(poll_loop(self.shared.clone(), self.interval)));
    }

    pub fn is_polling(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Fetch once outside the schedule. Same serialization as the loop.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.shared.refresh().await
    }

    /// Resolve once the snapshot is complete. `None` if shut down first.
    pub async fn wait_until_complete(&self) -> Option<ProcessingStatus> {
        let mut rx = self.subscribe();
        tokio::select! {
            _ = self.shared.cancel.cancelled() => None,
            r = rx.wait_for(|s| s.complete) => r.ok().and_then(|s| s.status.clone()),
        }
    }

    pub async fn resume_processing(&mut self) -> Result<()> {
        info!(project_id = %self.shared.project_id, "Resume processing requested");
        let result = self.shared.backend.resume_processing(self.shared.project_id).await;
        self.after_trigger("resume", result).await
    }

    pub async fn retry_failed_verifications(&mut self) -> Result<()> {
        info!(project_id = %self.shared.project_id, "Retry of failed verifications requested");
        let result = self
            .shared
            .backend
            .retry_failed_verifications(self.shared.project_id)
            .await;
        self.after_trigger("retry", result).await
    }

    /// An accepted trigger is a fresh activation. The previous completion no
    /// longer holds until a fetch after the trigger confirms it again.
    async fn after_trigger(
        &mut self,
        trigger: &'static str,
        result: std::result::Result<(), BackendError>,
    ) -> Result<()> {
        if let Err(e) = result {
            warn!(project_id = %self.shared.project_id, trigger, error = %e, "Processing trigger failed");
            return Err(e.into());
        }

        self.shared.snapshot.send_modify(|s| s.complete = false);
        self.refresh().await;
        if !self.snapshot().complete {
            self.activate();
        }
        Ok(())
    }

    /// Cancel the loop and wait for it to exit. Later results are dropped.
    pub async fn shutdown(&mut self) {
        self.shared.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Status polling task failed to join");
            }
        }
    }
}

impl Drop for StatusCoordinator {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{status_at, MemoryBackend};
    use trendline_common::PipelinePhase;

    const TICK: Duration = Duration::from_secs(5);

    fn coordinator(backend: &Arc<MemoryBackend>) -> StatusCoordinator {
        StatusCoordinator::new(&backend.context(), TICK)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_immediately_then_on_interval() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_processing_status(status_at(PipelinePhase::Embeddings, 3, 1, 0, 0));
        let mut c = coordinator(&backend);

        c.activate();
        settle().await;
        assert_eq!(backend.calls("processing_status"), 1);
        assert!(c.snapshot().polling);

        tokio::time::sleep(TICK).await;
        assert_eq!(backend.calls("processing_status"), 2);
        tokio::time::sleep(TICK).await;
        assert_eq!(backend.calls("processing_status"), 3);

        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stops_for_good_once_complete() {
        let backend = Arc::new(MemoryBackend::new());
        backend.script_status(vec![
            Ok(status_at(PipelinePhase::ClaudeVerification, 3, 3, 3, 2)),
            Ok(status_at(PipelinePhase::ClaudeVerification, 3, 3, 3, 3)),
        ]);
        let mut c = coordinator(&backend);

        c.activate();
        tokio::time::sleep(TICK * 10).await;

        assert_eq!(backend.calls("processing_status"), 2);
        let snap = c.snapshot();
        assert!(snap.complete);
        assert!(!snap.polling);
        assert!(!c.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_tick_changes_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let first = status_at(PipelinePhase::Embeddings, 4, 2, 0, 0);
        let third = status_at(PipelinePhase::Embeddings, 4, 4, 1, 0);
        backend.script_status(vec![
            Ok(first.clone()),
            Err(BackendError::RateLimited),
            Ok(third.clone()),
        ]);
        let mut c = coordinator(&backend);

        c.activate();
        settle().await;
        assert_eq!(c.snapshot().status.as_ref(), Some(&first));

        tokio::time::sleep(TICK).await;
        let snap = c.snapshot();
        assert_eq!(backend.calls("processing_status"), 2);
        assert_eq!(snap.status.as_ref(), Some(&first));
        assert_eq!(snap.error, None);
        assert!(snap.polling);

        tokio::time::sleep(TICK).await;
        assert_eq!(backend.calls("processing_status"), 3);
        assert_eq!(c.snapshot().status.as_ref(), Some(&third));

        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_is_recorded_and_polling_continues() {
        let backend = Arc::new(MemoryBackend::new());
        let first = status_at(PipelinePhase::Embeddings, 4, 2, 0, 0);
        backend.script_status(vec![
            Ok(first.clone()),
            Err(BackendError::Transport("connection reset".into())),
            Ok(status_at(PipelinePhase::Embeddings, 4, 3, 0, 0)),
        ]);
        let mut c = coordinator(&backend);

        c.activate();
        settle().await;
        tokio::time::sleep(TICK).await;
        let snap = c.snapshot();
        assert_eq!(snap.error.as_deref(), Some("connection reset"));
        assert_eq!(snap.status.as_ref(), Some(&first));

        tokio::time::sleep(TICK).await;
        assert_eq!(c.snapshot().error, None);

        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_requests() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_processing_status(status_at(PipelinePhase::Embeddings, 3, 0, 0, 0));
        let mut c = coordinator(&backend);

        c.activate();
        settle().await;
        c.shutdown().await;
        tokio::time::sleep(TICK * 5).await;

        assert_eq!(backend.calls("processing_status"), 1);
        c.activate();
        settle().await;
        assert_eq!(backend.calls("processing_status"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_result_is_discarded_after_shutdown() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_processing_status(status_at(PipelinePhase::Complete, 3, 3, 3, 3));
        backend.set_status_delay(Duration::from_secs(2));
        let mut c = coordinator(&backend);
        let rx = c.subscribe();

        c.activate();
        settle().await;
        c.shutdown().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(rx.borrow().status, None);
        assert!(!rx.borrow().complete);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refresh_is_skipped() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_processing_status(status_at(PipelinePhase::Embeddings, 3, 1, 0, 0));
        backend.set_status_delay(Duration::from_secs(1));
        let c = coordinator(&backend);

        let (a, b) = tokio::join!(c.refresh(), c.refresh());
        assert_eq!(a, RefreshOutcome::Updated);
        assert_eq!(b, RefreshOutcome::Skipped);
        assert_eq!(backend.calls("processing_status"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_rearms_polling() {
        let backend = Arc::new(MemoryBackend::new());
        let mut failed = status_at(PipelinePhase::Error, 3, 3, 1, 0);
        failed.error_message = Some("embedding provider timed out".into());
        backend.set_processing_status(failed);
        let mut c = coordinator(&backend);

        c.activate();
        settle().await;
        assert!(c.snapshot().complete);
        assert!(!c.is_polling());

        c.resume_processing().await.unwrap();
        let snap = c.snapshot();
        assert!(!snap.complete);
        assert_eq!(
            snap.status.as_ref().map(|s| s.status),
            Some(PipelinePhase::EmbeddingSimilarities)
        );
        assert!(c.is_polling());

        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_fetch_after_resume_keeps_polling() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_processing_status(status_at(PipelinePhase::Error, 3, 3, 1, 0));
        let mut c = coordinator(&backend);

        c.activate();
        settle().await;
        assert!(c.snapshot().complete);

        backend.fail_next("processing_status", BackendError::RateLimited);
        c.resume_processing().await.unwrap();
        let snap = c.snapshot();
        assert!(!snap.complete);
        assert_eq!(snap.error, None);
        assert!(c.is_polling());
        assert_eq!(backend.calls("processing_status"), 2);

        let early = tokio::time::timeout(Duration::from_millis(100), c.wait_until_complete()).await;
        assert!(early.is_err());

        tokio::time::sleep(TICK).await;
        assert!(backend.calls("processing_status") >= 3);
        assert_eq!(
            c.snapshot().status.as_ref().map(|s| s.status),
            Some(PipelinePhase::EmbeddingSimilarities)
        );
        assert!(c.is_polling());

        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trigger_reports_error() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_next("retry_failed_verifications", BackendError::Transport("queue offline".into()));
        let mut c = coordinator(&backend);

        let err = c.retry_failed_verifications().await.unwrap_err();
        assert_eq!(err.user_message(), "queue offline");
        assert_eq!(backend.calls("processing_status"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_complete_resolves_with_final_status() {
        let backend = Arc::new(MemoryBackend::new());
        backend.script_status(vec![
            Ok(status_at(PipelinePhase::Embeddings, 2, 1, 0, 0)),
            Ok(status_at(PipelinePhase::Complete, 2, 2, 2, 2)),
        ]);
        let mut c = coordinator(&backend);
        c.activate();

        let status = c.wait_until_complete().await.unwrap();
        assert_eq!(status.status, PipelinePhase::Complete);
    }
}
