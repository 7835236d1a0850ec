//! Upload, preview, map, commit.
//!
//! `confirm` exists only on `Mapping` and moves the flow out of it before the
//! commit is sent, so a second submit has nothing to act on.

use tracing::{info, warn};

use trendline_common::{ColumnMapping, ImportPreview, ImportReceipt};

use crate::error::{ReviewError, Result};
use crate::traits::ReviewContext;

#[derive(Debug, Clone, PartialEq)]
pub enum ImportState {
    Idle,
    Previewing { file_name: String },
    Mapping(ImportPreview),
    Uploading { preview: ImportPreview, mapping: ColumnMapping },
    Done(ImportReceipt),
}

impl ImportState {
    fn name(&self) -> &'static str {
        match self {
            ImportState::Idle => "idle",
            ImportState::Previewing { .. } => "previewing",
            ImportState::Mapping(_) => "mapping",
            ImportState::Uploading { .. } => "uploading",
            ImportState::Done(_) => "done",
        }
    }
}

pub struct ImportFlow {
    ctx: ReviewContext,
    state: ImportState,
}

impl ImportFlow {
    pub fn new(ctx: ReviewContext) -> Self {
        Self {
            ctx,
            state: ImportState::Idle,
        }
    }

    pub fn state(&self) -> &ImportState {
        &self.state
    }

    /// Send the file for column detection. On failure the flow is back at `Idle`.
    pub async fn preview(&mut self, file_name: &str, bytes: Vec<u8>) -> Result<ImportPreview> {
        if !matches!(self.state, ImportState::Idle) {
            return Err(self.wrong_state("preview a file"));
        }
        if bytes.is_empty() {
            return Err(ReviewError::Validation(format!("{file_name} is empty")));
        }

        self.state = ImportState::Previewing {
            file_name: file_name.to_string(),
        };
        match self
            .ctx
            .backend
            .preview_import(self.ctx.project_id, file_name, bytes)
            .await
        {
            Ok(preview) => {
                info!(
                    file_name,
                    columns = preview.columns.len(),
                    rows = preview.row_count,
                    "Import preview ready"
                );
                self.state = ImportState::Mapping(preview.clone());
                Ok(preview)
            }
            Err(e) => {
                warn!(file_name, error = %e, "Import preview failed");
                self.state = ImportState::Idle;
                Err(e.into())
            }
        }
    }

    /// Commit the previewed upload. A mapping that names a missing column is
    /// rejected in place; a failed commit returns to `Mapping`.
    pub async fn confirm(&mut self, mapping: ColumnMapping) -> Result<ImportReceipt> {
        let ImportState::Mapping(preview) = &self.state else {
            return Err(self.wrong_state("confirm an import"));
        };
        mapping.fits(&preview.columns).map_err(ReviewError::Validation)?;

        let preview = preview.clone();
        let upload_id = preview.upload_id;
        self.state = ImportState::Uploading {
            preview: preview.clone(),
            mapping: mapping.clone(),
        };

        match self
            .ctx
            .backend
            .commit_import(self.ctx.project_id, upload_id, &mapping)
            .await
        {
            Ok(receipt) => {
                info!(%upload_id, imported = receipt.imported_count, "Import committed");
                self.state = ImportState::Done(receipt.clone());
                Ok(receipt)
            }
            Err(e) => {
                warn!(%upload_id, error = %e, "Import commit failed");
                self.state = ImportState::Mapping(preview);
                Err(e.into())
            }
        }
    }

    /// Abandon the previewed upload.
    pub fn cancel(&mut self) -> Result<()> {
        if !matches!(self.state, ImportState::Mapping(_)) {
            return Err(self.wrong_state("cancel"));
        }
        self.state = ImportState::Idle;
        Ok(())
    }

    /// Start over from any state, e.g. after `Done` or a dropped request.
    pub fn reset(&mut self) {
        self.state = ImportState::Idle;
    }

    fn wrong_state(&self, action: &str) -> ReviewError {
        ReviewError::InvalidState(format!(
            "cannot {action} while the import is {}",
            self.state.name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::MemoryBackend;
    use crate::traits::ReviewBackend;
    use trendline_common::{BackendError, PipelinePhase};

    const CSV: &str = "Headline,Body,Outlet\n\
        Ports automate,Cranes run overnight,Freight Weekly\n\
        Drone delivery,Suburban pilots widen,Metro Daily\n";

    fn setup() -> (Arc<MemoryBackend>, ImportFlow) {
        let backend = Arc::new(MemoryBackend::new());
        let flow = ImportFlow::new(backend.context());
        (backend, flow)
    }

    fn mapping() -> ColumnMapping {
        ColumnMapping::builder()
            .text_column("Body")
            .title_column("Headline")
            .source_column("Outlet")
            .build()
    }

    #[tokio::test]
    async fn preview_then_commit() {
        let (backend, mut flow) = setup();
        backend.finish_processing();

        let preview = flow.preview("signals.csv", CSV.as_bytes().to_vec()).await.unwrap();
        assert_eq!(preview.columns, ["Headline", "Body", "Outlet"]);
        assert_eq!(preview.row_count, 2);
        assert!(matches!(flow.state(), ImportState::Mapping(_)));

        let receipt = flow.confirm(mapping()).await.unwrap();
        assert_eq!(receipt.imported_count, 2);
        assert_eq!(flow.state(), &ImportState::Done(receipt));

        let signals = backend.signals();
        assert_eq!(signals.len(), 2);
        assert!(signals.iter().all(|s| s.is_pending()));
        assert_eq!(signals[0].title.as_deref(), Some("Ports automate"));
        assert_eq!(signals[0].source.as_deref(), Some("Freight Weekly"));

        let status = backend.processing_status(backend.project_id()).await.unwrap();
        assert_eq!(status.status, PipelinePhase::Pending);
        assert_eq!(status.total_signals, 2);
    }

    #[tokio::test]
    async fn confirm_outside_mapping_is_rejected() {
        let (backend, mut flow) = setup();
        assert!(matches!(
            flow.confirm(mapping()).await,
            Err(ReviewError::InvalidState(_))
        ));

        flow.preview("signals.csv", CSV.as_bytes().to_vec()).await.unwrap();
        flow.confirm(mapping()).await.unwrap();
        assert!(matches!(
            flow.confirm(mapping()).await,
            Err(ReviewError::InvalidState(_))
        ));
        assert_eq!(backend.calls("commit_import"), 1);
    }

    #[tokio::test]
    async fn unknown_column_stays_in_mapping() {
        let (backend, mut flow) = setup();
        flow.preview("signals.csv", CSV.as_bytes().to_vec()).await.unwrap();

        let bad = ColumnMapping::builder().text_column("Summary").build();
        assert!(matches!(flow.confirm(bad).await, Err(ReviewError::Validation(_))));
        assert!(matches!(flow.state(), ImportState::Mapping(_)));
        assert_eq!(backend.calls("commit_import"), 0);
    }

    #[tokio::test]
    async fn failed_preview_returns_to_idle() {
        let (backend, mut flow) = setup();
        assert!(flow.preview("empty.csv", Vec::new()).await.is_err());
        assert_eq!(backend.calls("preview_import"), 0);

        backend.fail_next("preview_import", BackendError::Transport("upload interrupted".into()));
        let err = flow.preview("signals.csv", CSV.as_bytes().to_vec()).await.unwrap_err();
        assert_eq!(err.user_message(), "upload interrupted");
        assert_eq!(flow.state(), &ImportState::Idle);
    }

    #[tokio::test]
    async fn failed_commit_returns_to_mapping() {
        let (backend, mut flow) = setup();
        flow.preview("signals.csv", CSV.as_bytes().to_vec()).await.unwrap();
        backend.fail_next("commit_import", BackendError::Transport("connection reset".into()));

        assert!(flow.confirm(mapping()).await.is_err());
        assert!(matches!(flow.state(), ImportState::Mapping(_)));
        assert!(backend.signals().is_empty());

        flow.confirm(mapping()).await.unwrap();
        assert_eq!(backend.signals().len(), 2);
    }

    #[tokio::test]
    async fn cancel_and_reset() {
        let (_backend, mut flow) = setup();
        assert!(flow.cancel().is_err());
        flow.preview("signals.csv", CSV.as_bytes().to_vec()).await.unwrap();
        flow.cancel().unwrap();
        assert_eq!(flow.state(), &ImportState::Idle);

        flow.preview("signals.csv", CSV.as_bytes().to_vec()).await.unwrap();
        flow.confirm(mapping()).await.unwrap();
        flow.reset();
        assert_eq!(flow.state(), &ImportState::Idle);
    }
}
