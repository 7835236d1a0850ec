//! Signal and trend patch rules.
//!
//! Both the review engine (before calling out) and the in-memory backend
//! (before storing) run these checks, so a rejected patch never touches state.

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::types::{Signal, SignalStatus, Trend, TrendId, TrendStatus};

/// Partial update of a signal. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SignalStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_id: Option<TrendId>,
}

impl SignalPatch {
    pub fn archive(note: impl Into<String>) -> Self {
        Self {
            status: Some(SignalStatus::Archived),
            note: Some(note.into()),
            ..Default::default()
        }
    }

    pub fn combine_into(trend_id: TrendId) -> Self {
        Self {
            status: Some(SignalStatus::Combined),
            trend_id: Some(trend_id),
            ..Default::default()
        }
    }

    pub fn release() -> Self {
        Self {
            status: Some(SignalStatus::Pending),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == SignalPatch::default()
    }
}

/// Partial update of a trend. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TrendStatus>,
}

impl TrendPatch {
    pub fn status(status: TrendStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == TrendPatch::default()
    }
}

fn non_empty(value: Option<&str>) -> bool {
    value.map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// Check a trend patch against the current trend.
///
/// Returns the patch to apply, with a status equal to the current one
/// dropped. Nothing is applied when this errors.
pub fn validate_trend_patch(current: &Trend, patch: &TrendPatch) -> Result<TrendPatch, LifecycleError> {
    if current.status.is_terminal() {
        return Err(LifecycleError::TerminalState(format!(
            "trend is {}; retired and archived trends cannot be changed",
            current.status
        )));
    }

    if let Some(title) = &patch.title {
        if title.trim().is_empty() {
            return Err(LifecycleError::Validation("trend title cannot be empty".into()));
        }
    }

    let mut effective = patch.clone();
    let Some(next) = patch.status else {
        return Ok(effective);
    };

    if next == current.status {
        effective.status = None;
        return Ok(effective);
    }

    if !current.status.can_transition_to(next) {
        return Err(LifecycleError::Validation(format!(
            "a {} trend cannot become {}",
            current.status, next
        )));
    }

    let title = patch.title.as_deref().unwrap_or(&current.title);
    if next == TrendStatus::Final && !non_empty(Some(title)) {
        return Err(LifecycleError::Validation(
            "a title is required to finalize a trend".into(),
        ));
    }

    let note = patch.note.as_deref().or(current.note.as_deref());
    if next.requires_note() && !non_empty(note) {
        return Err(LifecycleError::Validation(format!(
            "a note explaining why is required to mark a trend {next}"
        )));
    }

    Ok(effective)
}

/// Apply an already validated patch.
pub fn apply_trend_patch(trend: &mut Trend, patch: &TrendPatch) {
    if let Some(title) = &patch.title {
        trend.title = title.clone();
    }
    if let Some(summary) = &patch.summary {
        trend.summary = summary.clone();
    }
    if let Some(note) = &patch.note {
        trend.note = Some(note.clone());
    }
    if let Some(status) = patch.status {
        trend.status = status;
    }
}

/// Check a signal patch against the current signal.
pub fn validate_signal_patch(current: &Signal, patch: &SignalPatch) -> Result<SignalPatch, LifecycleError> {
    if let Some(text) = &patch.original_text {
        if text.trim().is_empty() {
            return Err(LifecycleError::Validation("signal text cannot be empty".into()));
        }
    }

    let note = patch.note.as_deref().or(current.note.as_deref());

    match patch.status {
        Some(SignalStatus::Archived) => {
            if current.status == SignalStatus::Combined {
                return Err(LifecycleError::TerminalState(
                    "signal belongs to a trend; undo or remove it from its trend first".into(),
                ));
            }
            if !non_empty(note) {
                return Err(LifecycleError::Validation(
                    "a note is required to archive a signal".into(),
                ));
            }
            if patch.trend_id.is_some() {
                return Err(LifecycleError::Validation(
                    "an archived signal cannot belong to a trend".into(),
                ));
            }
        }
        Some(SignalStatus::Combined) => {
            let Some(trend_id) = patch.trend_id else {
                return Err(LifecycleError::Validation(
                    "combining a signal requires a trend".into(),
                ));
            };
            match current.status {
                SignalStatus::Archived => {
                    return Err(LifecycleError::TerminalState(
                        "archived signals must be restored before joining a trend".into(),
                    ));
                }
                SignalStatus::Combined if current.trend_id != Some(trend_id) => {
                    return Err(LifecycleError::TerminalState(format!(
                        "signal already belongs to trend {}",
                        current
                            .trend_id
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "unknown".into())
                    )));
                }
                _ => {}
            }
        }
        Some(SignalStatus::Pending) => {
            if patch.trend_id.is_some() {
                return Err(LifecycleError::Validation(
                    "a pending signal cannot belong to a trend".into(),
                ));
            }
        }
        None => {
            if patch.trend_id.is_some() {
                return Err(LifecycleError::Validation(
                    "trend membership changes only together with status Combined".into(),
                ));
            }
            if current.status == SignalStatus::Archived && !non_empty(note) {
                return Err(LifecycleError::Validation(
                    "an archived signal must keep its note".into(),
                ));
            }
        }
    }

    Ok(patch.clone())
}

/// Apply an already validated patch. Trend linkage follows the status.
pub fn apply_signal_patch(signal: &mut Signal, patch: &SignalPatch) {
    if let Some(text) = &patch.original_text {
        signal.original_text = text.clone();
    }
    if let Some(title) = &patch.title {
        signal.title = Some(title.clone());
    }
    if let Some(source) = &patch.source {
        signal.source = Some(source.clone());
    }
    if let Some(note) = &patch.note {
        signal.note = Some(note.clone());
    }
    match patch.status {
        Some(SignalStatus::Combined) => {
            signal.status = SignalStatus::Combined;
            signal.trend_id = patch.trend_id;
        }
        Some(status) => {
            signal.status = status;
            signal.trend_id = None;
        }
        None => {}
    }
}
