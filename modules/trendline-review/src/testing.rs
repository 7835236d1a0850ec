// Test support for the review core.
//
// MemoryBackend (ReviewBackend) is a stateful in-memory stand-in for the
// server. It keeps the data-model invariants the real backend guarantees:
// - a signal is Combined exactly when it points at an existing trend
// - a trend's signal_count is always the live member count
// - patches run through the same lifecycle rules before anything is stored
//
// Fault injection: `fail_next(op, err)`, `fail_member_flip_for(id)`,
// `script_status(..)`, `set_status_delay(..)`. Every call is counted per
// operation name so tests can assert on traffic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use trendline_common::{
    apply_signal_patch, apply_trend_patch, validate_signal_patch, validate_trend_patch,
    BackendError, ColumnMapping, ImportPreview, ImportReceipt, NewSignal, NewTrend, NextUnassigned,
    PipelinePhase, ProcessingStatus, ProjectId, Signal, SignalFilter, SignalId, SignalPage,
    SignalPatch, SignalStatus, SimilarSignal, Trend, TrendDetail, TrendId, TrendPatch, TrendStatus,
    TrendSummary,
};

use crate::traits::{BackendResult, ReviewBackend, ReviewContext};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Processing status with the given phase and counters.
pub fn status_at(
    phase: PipelinePhase,
    total: u32,
    embeddings: u32,
    similarities: u32,
    verifications: u32,
) -> ProcessingStatus {
    let done = embeddings.min(total) + similarities.min(total) + verifications.min(total);
    ProcessingStatus {
        status: phase,
        total_signals: total,
        embeddings_complete: embeddings,
        embedding_similarities_complete: similarities,
        claude_verifications_complete: verifications,
        claude_verification_failures: 0,
        percent_complete: if total == 0 {
            0.0
        } else {
            f64::from(done) / f64::from(total * 3) * 100.0
        },
        estimated_seconds_remaining: None,
        error_message: None,
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

struct Upload {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

struct State {
    signals: Vec<Signal>,
    trends: Vec<Trend>,
    similarities: HashMap<(SignalId, SignalId), f64>,
    status: ProcessingStatus,
    scripted_status: VecDeque<BackendResult<ProcessingStatus>>,
    failures: HashMap<&'static str, VecDeque<BackendError>>,
    flip_failures: HashSet<SignalId>,
    calls: HashMap<&'static str, usize>,
    uploads: HashMap<Uuid, Upload>,
}

pub struct MemoryBackend {
    project_id: ProjectId,
    state: Mutex<State>,
    status_delay: Mutex<Option<Duration>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            project_id: Uuid::new_v4(),
            state: Mutex::new(State {
                signals: Vec::new(),
                trends: Vec::new(),
                similarities: HashMap::new(),
                status: ProcessingStatus::pending(0),
                scripted_status: VecDeque::new(),
                failures: HashMap::new(),
                flip_failures: HashSet::new(),
                calls: HashMap::new(),
                uploads: HashMap::new(),
            }),
            status_delay: Mutex::new(None),
        }
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn context(self: &Arc<Self>) -> ReviewContext {
        ReviewContext::new(self.project_id, self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Seeding ---

    pub fn add_signal(&self, text: &str) -> Signal {
        self.add_signal_with(NewSignal::builder().original_text(text).build())
    }

    pub fn add_signal_with(&self, new: NewSignal) -> Signal {
        let mut state = self.lock();
        let signal = new_signal(self.project_id, new);
        state.signals.push(signal.clone());
        signal
    }

    /// Symmetric pairwise score between two signals.
    pub fn set_similarity(&self, a: SignalId, b: SignalId, score: f64) {
        let mut state = self.lock();
        state.similarities.insert((a, b), score);
        state.similarities.insert((b, a), score);
    }

    pub fn set_processing_status(&self, status: ProcessingStatus) {
        self.lock().status = status;
    }

    /// Mark every phase done for the current signal count.
    pub fn finish_processing(&self) {
        let mut state = self.lock();
        let total = state.signals.len() as u32;
        state.status = status_at(PipelinePhase::Complete, total, total, total, total);
    }

    /// Responses handed out by `processing_status` before falling back to the stored status.
    pub fn script_status(&self, responses: Vec<BackendResult<ProcessingStatus>>) {
        self.lock().scripted_status = responses.into();
    }

    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock().unwrap_or_else(|p| p.into_inner()) = Some(delay);
    }

    /// The next call of `op` fails with `err` without touching state.
    pub fn fail_next(&self, op: &'static str, err: BackendError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Linking this signal to a trend fails with a transport error.
    pub fn fail_member_flip_for(&self, signal_id: SignalId) {
        self.lock().flip_failures.insert(signal_id);
    }

    // --- Inspection ---

    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn signal(&self, id: SignalId) -> Option<Signal> {
        self.lock().signals.iter().find(|s| s.id == id).cloned()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.lock().signals.clone()
    }

    pub fn trend(&self, id: TrendId) -> Option<Trend> {
        let state = self.lock();
        state
            .trends
            .iter()
            .find(|t| t.id == id)
            .map(|t| state.materialize(t))
    }

    pub fn trends(&self) -> Vec<Trend> {
        let state = self.lock();
        state.trends.iter().map(|t| state.materialize(t)).collect()
    }

    /// Every Combined signal points at an existing trend, every linked
    /// signal is Combined, and archived signals carry a note.
    pub fn assert_invariants(&self) {
        let state = self.lock();
        for s in &state.signals {
            match s.status {
                SignalStatus::Combined => {
                    let trend_id = s.trend_id.expect("combined signal without trend");
                    assert!(
                        state.trends.iter().any(|t| t.id == trend_id),
                        "signal {} points at missing trend {trend_id}",
                        s.id
                    );
                }
                SignalStatus::Pending => assert!(s.trend_id.is_none(), "pending signal {} linked", s.id),
                SignalStatus::Archived => {
                    assert!(s.trend_id.is_none(), "archived signal {} linked", s.id);
                    assert!(
                        s.note.as_deref().is_some_and(|n| !n.trim().is_empty()),
                        "archived signal {} without note",
                        s.id
                    );
                }
            }
        }
    }

    fn enter(&self, op: &'static str) -> BackendResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(err) = state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

fn new_signal(project_id: ProjectId, new: NewSignal) -> Signal {
    Signal {
        id: Uuid::new_v4(),
        project_id,
        original_text: new.original_text,
        title: new.title,
        source: new.source,
        note: new.note,
        status: SignalStatus::Pending,
        trend_id: None,
        created_at: Utc::now(),
    }
}

impl State {
    fn member_count(&self, trend_id: TrendId) -> u32 {
        self.signals
            .iter()
            .filter(|s| s.trend_id == Some(trend_id))
            .count() as u32
    }

    fn materialize(&self, trend: &Trend) -> Trend {
        Trend {
            signal_count: self.member_count(trend.id),
            ..trend.clone()
        }
    }

    fn signal_mut(&mut self, id: SignalId) -> BackendResult<&mut Signal> {
        self.signals
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| BackendError::NotFound(format!("signal {id}")))
    }

    fn trend_index(&self, id: TrendId) -> BackendResult<usize> {
        self.trends
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| BackendError::NotFound(format!("trend {id}")))
    }

    fn release_members(&mut self, trend_id: TrendId) {
        for s in self.signals.iter_mut().filter(|s| s.trend_id == Some(trend_id)) {
            apply_signal_patch(s, &SignalPatch::release());
        }
    }

    fn summarize(&self, ids: &[SignalId]) -> TrendSummary {
        let members: Vec<&Signal> = ids
            .iter()
            .filter_map(|id| self.signals.iter().find(|s| s.id == *id))
            .collect();
        let title = members
            .first()
            .map(|s| s.display_title().to_string())
            .unwrap_or_else(|| "Untitled trend".to_string());
        let summary = format!(
            "{} related signal(s): {}",
            members.len(),
            members
                .iter()
                .map(|s| s.display_title())
                .collect::<Vec<_>>()
                .join("; ")
        );
        TrendSummary { title, summary }
    }
}

fn rejected(err: trendline_common::LifecycleError) -> BackendError {
    BackendError::Rejected(err.to_string())
}

#[async_trait]
impl ReviewBackend for MemoryBackend {
    async fn processing_status(&self, project_id: ProjectId) -> BackendResult<ProcessingStatus> {
        let delay = *self.status_delay.lock().unwrap_or_else(|p| p.into_inner());
        let result = {
            let mut state = self.enter("processing_status")?;
            if project_id != self.project_id {
                return Err(BackendError::NotFound(format!("project {project_id}")));
            }
            state
                .scripted_status
                .pop_front()
                .unwrap_or_else(|| Ok(state.status.clone()))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn resume_processing(&self, _project_id: ProjectId) -> BackendResult<()> {
        let mut state = self.enter("resume_processing")?;
        let s = &mut state.status;
        s.error_message = None;
        s.status = if s.embeddings_complete < s.total_signals {
            PipelinePhase::Embeddings
        } else if s.embedding_similarities_complete < s.total_signals {
            PipelinePhase::EmbeddingSimilarities
        } else if s.claude_verifications_complete < s.total_signals {
            PipelinePhase::ClaudeVerification
        } else {
            PipelinePhase::Complete
        };
        Ok(())
    }

    async fn retry_failed_verifications(&self, _project_id: ProjectId) -> BackendResult<()> {
        let mut state = self.enter("retry_failed_verifications")?;
        let s = &mut state.status;
        s.claude_verifications_complete = s
            .claude_verifications_complete
            .saturating_sub(s.claude_verification_failures);
        s.claude_verification_failures = 0;
        s.error_message = None;
        s.status = PipelinePhase::ClaudeVerification;
        Ok(())
    }

    async fn list_signals(&self, project_id: ProjectId, filter: &SignalFilter) -> BackendResult<SignalPage> {
        let state = self.enter("list_signals")?;
        let in_project = state.signals.iter().filter(|s| s.project_id == project_id);
        let matching: Vec<&Signal> = in_project.clone().filter(|s| filter.matches(s)).collect();
        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(SignalPage {
            total: matching.len() as u32,
            unassigned_count: in_project.filter(|s| s.is_pending()).count() as u32,
            signals: matching.into_iter().skip(offset).take(limit).cloned().collect(),
        })
    }

    async fn next_unassigned(
        &self,
        project_id: ProjectId,
        exclude_id: Option<SignalId>,
    ) -> BackendResult<NextUnassigned> {
        let state = self.enter("next_unassigned")?;
        let pending: Vec<&Signal> = state
            .signals
            .iter()
            .filter(|s| s.project_id == project_id && s.is_pending())
            .collect();
        let remaining_count = pending.len() as u32;
        let Some(focal) = pending.into_iter().find(|s| Some(s.id) != exclude_id) else {
            return Ok(NextUnassigned {
                signal: None,
                similar_signals: Vec::new(),
                remaining_count,
            });
        };

        let similar_signals = state
            .signals
            .iter()
            .filter(|s| s.id != focal.id && s.project_id == project_id)
            .filter(|s| s.status != SignalStatus::Archived)
            .filter_map(|s| {
                let score = *state.similarities.get(&(focal.id, s.id))?;
                let trend_title = s
                    .trend_id
                    .and_then(|t| state.trends.iter().find(|tr| tr.id == t))
                    .map(|t| t.title.clone());
                Some(SimilarSignal::from_signal(s, score, trend_title))
            })
            .collect();

        Ok(NextUnassigned {
            signal: Some(focal.clone()),
            similar_signals,
            remaining_count,
        })
    }

    async fn get_signal(&self, signal_id: SignalId) -> BackendResult<Signal> {
        let mut state = self.enter("get_signal")?;
        state.signal_mut(signal_id).map(|s| s.clone())
    }

    async fn create_signal(&self, project_id: ProjectId, signal: &NewSignal) -> BackendResult<Signal> {
        let mut state = self.enter("create_signal")?;
        if signal.original_text.trim().is_empty() {
            return Err(BackendError::Rejected("signal text cannot be empty".into()));
        }
        let created = new_signal(project_id, signal.clone());
        state.signals.push(created.clone());
        Ok(created)
    }

    async fn update_signal(&self, signal_id: SignalId, patch: &SignalPatch) -> BackendResult<Signal> {
        let mut state = self.enter("update_signal")?;
        if patch.status == Some(SignalStatus::Combined) && state.flip_failures.contains(&signal_id) {
            return Err(BackendError::Transport(format!(
                "timed out linking signal {signal_id}"
            )));
        }
        if let Some(trend_id) = patch.trend_id {
            let index = state.trend_index(trend_id)?;
            if state.trends[index].status.is_terminal() {
                return Err(BackendError::Rejected(format!(
                    "trend {trend_id} is {} and takes no new members",
                    state.trends[index].status
                )));
            }
        }
        let signal = state.signal_mut(signal_id)?;
        let effective = validate_signal_patch(signal, patch).map_err(rejected)?;
        apply_signal_patch(signal, &effective);
        Ok(signal.clone())
    }

    async fn delete_signal(&self, signal_id: SignalId) -> BackendResult<()> {
        let mut state = self.enter("delete_signal")?;
        let before = state.signals.len();
        state.signals.retain(|s| s.id != signal_id);
        if state.signals.len() == before {
            return Err(BackendError::NotFound(format!("signal {signal_id}")));
        }
        state.similarities.retain(|(a, b), _| *a != signal_id && *b != signal_id);
        Ok(())
    }

    async fn list_trends(&self, project_id: ProjectId, include_archived: bool) -> BackendResult<Vec<Trend>> {
        let state = self.enter("list_trends")?;
        Ok(state
            .trends
            .iter()
            .filter(|t| t.project_id == project_id)
            .filter(|t| include_archived || t.status.is_active())
            .map(|t| state.materialize(t))
            .collect())
    }

    async fn get_trend(&self, trend_id: TrendId) -> BackendResult<TrendDetail> {
        let state = self.enter("get_trend")?;
        let index = state.trend_index(trend_id)?;
        Ok(TrendDetail {
            trend: state.materialize(&state.trends[index]),
            members: state
                .signals
                .iter()
                .filter(|s| s.trend_id == Some(trend_id))
                .cloned()
                .collect(),
        })
    }

    async fn create_trend(&self, project_id: ProjectId, trend: &NewTrend) -> BackendResult<Trend> {
        let mut state = self.enter("create_trend")?;
        if trend.signal_ids.is_empty() {
            return Err(BackendError::Rejected("a trend needs at least one signal".into()));
        }
        for id in &trend.signal_ids {
            let signal = state.signal_mut(*id)?;
            if !signal.is_pending() {
                return Err(BackendError::Rejected(format!(
                    "signal {id} is {} and cannot join a new trend",
                    signal.status
                )));
            }
        }
        let summary = state.summarize(&trend.signal_ids);
        let created = Trend {
            id: Uuid::new_v4(),
            project_id,
            title: summary.title,
            summary: summary.summary,
            note: None,
            signal_count: 0,
            status: TrendStatus::Draft,
            created_at: Utc::now(),
        };
        state.trends.push(created.clone());
        Ok(created)
    }

    async fn update_trend(&self, trend_id: TrendId, patch: &TrendPatch) -> BackendResult<Trend> {
        let mut state = self.enter("update_trend")?;
        let index = state.trend_index(trend_id)?;
        let effective = validate_trend_patch(&state.trends[index], patch).map_err(rejected)?;
        apply_trend_patch(&mut state.trends[index], &effective);
        Ok(state.materialize(&state.trends[index]))
    }

    async fn delete_trend(&self, trend_id: TrendId) -> BackendResult<()> {
        let mut state = self.enter("delete_trend")?;
        let index = state.trend_index(trend_id)?;
        state.release_members(trend_id);
        state.trends.remove(index);
        Ok(())
    }

    async fn undo_trend(&self, trend_id: TrendId) -> BackendResult<()> {
        let mut state = self.enter("undo_trend")?;
        let index = state.trend_index(trend_id)?;
        if state.trends[index].status.is_terminal() {
            return Err(BackendError::Rejected(format!(
                "a {} trend cannot be undone",
                state.trends[index].status
            )));
        }
        state.release_members(trend_id);
        state.trends.remove(index);
        Ok(())
    }

    async fn regenerate_trend_summary(&self, trend_id: TrendId) -> BackendResult<TrendSummary> {
        let state = self.enter("regenerate_trend_summary")?;
        let index = state.trend_index(trend_id)?;
        if state.trends[index].status.is_terminal() {
            return Err(BackendError::Rejected("terminal trends keep their summary".into()));
        }
        let members: Vec<SignalId> = state
            .signals
            .iter()
            .filter(|s| s.trend_id == Some(trend_id))
            .map(|s| s.id)
            .collect();
        let mut summary = state.summarize(&members);
        summary.summary = format!("Regenerated: {}", summary.summary);
        Ok(summary)
    }

    async fn preview_import(
        &self,
        _project_id: ProjectId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> BackendResult<ImportPreview> {
        let mut state = self.enter("preview_import")?;
        let text = String::from_utf8(bytes)
            .map_err(|_| BackendError::Rejected(format!("{file_name} is not a text file")))?;
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let columns: Vec<String> = lines
            .next()
            .ok_or_else(|| BackendError::Rejected(format!("{file_name} is empty")))?
            .split(',')
            .map(|c| c.trim().to_string())
            .collect();
        let rows: Vec<Vec<String>> = lines
            .map(|l| l.split(',').map(|c| c.trim().to_string()).collect())
            .collect();
        let upload_id = Uuid::new_v4();
        let preview = ImportPreview {
            upload_id,
            columns: columns.clone(),
            sample_rows: rows.iter().take(5).cloned().collect(),
            row_count: rows.len() as u32,
        };
        state.uploads.insert(upload_id, Upload { columns, rows });
        Ok(preview)
    }

    async fn commit_import(
        &self,
        project_id: ProjectId,
        upload_id: Uuid,
        mapping: &ColumnMapping,
    ) -> BackendResult<ImportReceipt> {
        let mut state = self.enter("commit_import")?;
        let upload = state
            .uploads
            .remove(&upload_id)
            .ok_or_else(|| BackendError::NotFound(format!("upload {upload_id}")))?;
        mapping.fits(&upload.columns).map_err(BackendError::Rejected)?;

        let column = |name: &str| upload.columns.iter().position(|c| c == name);
        let text_at = column(&mapping.text_column);
        let title_at = mapping.title_column.as_deref().and_then(column);
        let source_at = mapping.source_column.as_deref().and_then(column);

        let mut imported = 0;
        for row in &upload.rows {
            let cell = |at: Option<usize>| {
                at.and_then(|i| row.get(i))
                    .map(|v| v.to_string())
                    .filter(|v| !v.is_empty())
            };
            let Some(text) = cell(text_at) else {
                continue;
            };
            let signal = new_signal(
                project_id,
                NewSignal {
                    original_text: text,
                    title: cell(title_at),
                    source: cell(source_at),
                    note: None,
                },
            );
            state.signals.push(signal);
            imported += 1;
        }

        let total = state
            .signals
            .iter()
            .filter(|s| s.project_id == project_id)
            .count() as u32;
        state.status = ProcessingStatus::pending(total);
        Ok(ImportReceipt {
            imported_count: imported,
        })
    }
}
