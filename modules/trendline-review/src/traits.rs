// Trait abstraction for the backend collaborator.
//
// ReviewBackend is everything the review core consumes from the server that
// owns signals, trends, and the processing pipeline. TrendlineClient is the
// production implementation; MemoryBackend (testing.rs) is the stateful
// in-memory one used by every test. No network in `cargo test`.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use trendline_client::TrendlineClient;
use trendline_common::{
    BackendError, ColumnMapping, ImportPreview, ImportReceipt, NewSignal, NewTrend, NextUnassigned,
    ProcessingStatus, ProjectId, Signal, SignalFilter, SignalId, SignalPage, SignalPatch, Trend,
    TrendDetail, TrendId, TrendPatch, TrendSummary,
};

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait ReviewBackend: Send + Sync {
    // --- Processing pipeline ---

    async fn processing_status(&self, project_id: ProjectId) -> BackendResult<ProcessingStatus>;

    async fn resume_processing(&self, project_id: ProjectId) -> BackendResult<()>;

    async fn retry_failed_verifications(&self, project_id: ProjectId) -> BackendResult<()>;

    // --- Signals ---

    async fn list_signals(&self, project_id: ProjectId, filter: &SignalFilter) -> BackendResult<SignalPage>;

    /// First Pending signal in queue order other than `exclude_id`, with its candidates.
    async fn next_unassigned(
        &self,
        project_id: ProjectId,
        exclude_id: Option<SignalId>,
    ) -> BackendResult<NextUnassigned>;

    async fn get_signal(&self, signal_id: SignalId) -> BackendResult<Signal>;

    async fn create_signal(&self, project_id: ProjectId, signal: &NewSignal) -> BackendResult<Signal>;

    async fn update_signal(&self, signal_id: SignalId, patch: &SignalPatch) -> BackendResult<Signal>;

    async fn delete_signal(&self, signal_id: SignalId) -> BackendResult<()>;

    // --- Trends ---

    async fn list_trends(&self, project_id: ProjectId, include_archived: bool) -> BackendResult<Vec<Trend>>;

    async fn get_trend(&self, trend_id: TrendId) -> BackendResult<TrendDetail>;

    /// Create a draft trend with a generated summary. Member linkage is a separate step.
    async fn create_trend(&self, project_id: ProjectId, trend: &NewTrend) -> BackendResult<Trend>;

    async fn update_trend(&self, trend_id: TrendId, patch: &TrendPatch) -> BackendResult<Trend>;

    async fn delete_trend(&self, trend_id: TrendId) -> BackendResult<()>;

    /// Release every member back to Pending and drop the trend from the active set.
    async fn undo_trend(&self, trend_id: TrendId) -> BackendResult<()>;

    /// Ask the summarizer for a fresh title and summary. Stores nothing.
    async fn regenerate_trend_summary(&self, trend_id: TrendId) -> BackendResult<TrendSummary>;

    // --- Import ---

    async fn preview_import(
        &self,
        project_id: ProjectId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> BackendResult<ImportPreview>;

    async fn commit_import(
        &self,
        project_id: ProjectId,
        upload_id: Uuid,
        mapping: &ColumnMapping,
    ) -> BackendResult<ImportReceipt>;
}

#[async_trait]
impl ReviewBackend for TrendlineClient {
    async fn processing_status(&self, project_id: ProjectId) -> BackendResult<ProcessingStatus> {
        Ok(self.processing_status(project_id).await?)
    }

    async fn resume_processing(&self, project_id: ProjectId) -> BackendResult<()> {
        Ok(self.resume_processing(project_id).await?)
    }

    async fn retry_failed_verifications(&self, project_id: ProjectId) -> BackendResult<()> {
        Ok(self.retry_failed_verifications(project_id).await?)
    }

    async fn list_signals(&self, project_id: ProjectId, filter: &SignalFilter) -> BackendResult<SignalPage> {
        Ok(self.list_signals(project_id, filter).await?)
    }

    async fn next_unassigned(
        &self,
        project_id: ProjectId,
        exclude_id: Option<SignalId>,
    ) -> BackendResult<NextUnassigned> {
        Ok(self.next_unassigned(project_id, exclude_id).await?)
    }

    async fn get_signal(&self, signal_id: SignalId) -> BackendResult<Signal> {
        Ok(self.get_signal(signal_id).await?)
    }

    async fn create_signal(&self, project_id: ProjectId, signal: &NewSignal) -> BackendResult<Signal> {
        Ok(self.create_signal(project_id, signal).await?)
    }

    async fn update_signal(&self, signal_id: SignalId, patch: &SignalPatch) -> BackendResult<Signal> {
        Ok(self.update_signal(signal_id, patch).await?)
    }

    async fn delete_signal(&self, signal_id: SignalId) -> BackendResult<()> {
        Ok(self.delete_signal(signal_id).await?)
    }

    async fn list_trends(&self, project_id: ProjectId, include_archived: bool) -> BackendResult<Vec<Trend>> {
        Ok(self.list_trends(project_id, include_archived).await?)
    }

    async fn get_trend(&self, trend_id: TrendId) -> BackendResult<TrendDetail> {
        Ok(self.get_trend(trend_id).await?)
    }

    async fn create_trend(&self, project_id: ProjectId, trend: &NewTrend) -> BackendResult<Trend> {
        Ok(self.create_trend(project_id, trend).await?)
    }

    async fn update_trend(&self, trend_id: TrendId, patch: &TrendPatch) -> BackendResult<Trend> {
        Ok(self.update_trend(trend_id, patch).await?)
    }

    async fn delete_trend(&self, trend_id: TrendId) -> BackendResult<()> {
        Ok(self.delete_trend(trend_id).await?)
    }

    async fn undo_trend(&self, trend_id: TrendId) -> BackendResult<()> {
        Ok(self.undo_trend(trend_id).await?)
    }

    async fn regenerate_trend_summary(&self, trend_id: TrendId) -> BackendResult<TrendSummary> {
        Ok(self.regenerate_trend_summary(trend_id).await?)
    }

    async fn preview_import(
        &self,
        project_id: ProjectId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> BackendResult<ImportPreview> {
        Ok(self.preview_import(project_id, file_name, bytes).await?)
    }

    async fn commit_import(
        &self,
        project_id: ProjectId,
        upload_id: Uuid,
        mapping: &ColumnMapping,
    ) -> BackendResult<ImportReceipt> {
        Ok(self.commit_import(project_id, upload_id, mapping).await?)
    }
}

/// Project-scoped handle passed to every review component.
#[derive(Clone)]
pub struct ReviewContext {
    pub project_id: ProjectId,
    pub backend: Arc<dyn ReviewBackend>,
}

impl ReviewContext {
    pub fn new(project_id: ProjectId, backend: Arc<dyn ReviewBackend>) -> Self {
        Self { project_id, backend }
    }
}
