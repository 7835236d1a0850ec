use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

pub type ProjectId = Uuid;
pub type SignalId = Uuid;
pub type TrendId = Uuid;

// --- Signals ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalStatus {
    Pending,
    Combined,
    Archived,
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalStatus::Pending => write!(f, "Pending"),
            SignalStatus::Combined => write!(f, "Combined"),
            SignalStatus::Archived => write!(f, "Archived"),
        }
    }
}

/// One imported unit of text considered for trend membership.
///
/// `trend_id` is set exactly when `status` is `Combined`. An `Archived`
/// signal always carries a non-empty note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: SignalId,
    pub project_id: ProjectId,
    pub original_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub status: SignalStatus,
    #[serde(default)]
    pub trend_id: Option<TrendId>,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn is_pending(&self) -> bool {
        self.status == SignalStatus::Pending
    }

    /// Title if present, otherwise the first line of the original text.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => self.original_text.lines().next().unwrap_or("").trim(),
        }
    }
}

/// Fields supplied when a signal is created. New signals are always `Pending`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct NewSignal {
    #[builder(setter(into))]
    pub original_text: String,
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Query for `list_signals`. All fields are optional narrowing constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct SignalFilter {
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SignalStatus>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_id: Option<TrendId>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl SignalFilter {
    /// True when `signal` satisfies every constraint except paging.
    pub fn matches(&self, signal: &Signal) -> bool {
        if let Some(status) = self.status {
            if signal.status != status {
                return false;
            }
        }
        if let Some(trend_id) = self.trend_id {
            if signal.trend_id != Some(trend_id) {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let haystacks = [
                Some(signal.original_text.as_str()),
                signal.title.as_deref(),
                signal.source.as_deref(),
                signal.note.as_deref(),
            ];
            if !haystacks
                .iter()
                .flatten()
                .any(|h| h.to_lowercase().contains(&needle))
            {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPage {
    pub signals: Vec<Signal>,
    pub total: u32,
    pub unassigned_count: u32,
}

/// A signal annotated with its score relative to a reference signal.
///
/// Scores above 1 are on the 1-10 verification scale; scores at or below 1
/// are cosine similarities. See [`crate::score::normalize_score`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarSignal {
    pub id: SignalId,
    pub original_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub status: SignalStatus,
    pub score: f64,
    #[serde(default)]
    pub trend_id: Option<TrendId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_title: Option<String>,
}

impl SimilarSignal {
    pub fn from_signal(signal: &Signal, score: f64, trend_title: Option<String>) -> Self {
        Self {
            id: signal.id,
            original_text: signal.original_text.clone(),
            title: signal.title.clone(),
            source: signal.source.clone(),
            status: signal.status,
            score,
            trend_id: signal.trend_id,
            trend_title,
        }
    }

    /// Already claimed by a trend, so it cannot join a new one.
    pub fn is_linked(&self) -> bool {
        self.trend_id.is_some() || self.status == SignalStatus::Combined
    }
}

/// Result of `next_unassigned`. `signal` is `None` once nothing is Pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextUnassigned {
    pub signal: Option<Signal>,
    #[serde(default)]
    pub similar_signals: Vec<SimilarSignal>,
    pub remaining_count: u32,
}

// --- Trends ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStatus {
    Draft,
    Final,
    Retired,
    Archived,
}

impl TrendStatus {
    /// Draft and final trends make up the active set.
    pub fn is_active(self) -> bool {
        matches!(self, TrendStatus::Draft | TrendStatus::Final)
    }

    /// Retired and archived trends accept no further edits.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn requires_note(self) -> bool {
        matches!(self, TrendStatus::Retired | TrendStatus::Archived)
    }

    /// Legal lifecycle moves. Staying put is always allowed from an active state.
    pub fn can_transition_to(self, next: TrendStatus) -> bool {
        use TrendStatus::*;
        match (self, next) {
            (Draft, Draft) | (Final, Final) => true,
            (Draft, Final) => true,
            (Draft | Final, Retired | Archived) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TrendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendStatus::Draft => write!(f, "draft"),
            TrendStatus::Final => write!(f, "final"),
            TrendStatus::Retired => write!(f, "retired"),
            TrendStatus::Archived => write!(f, "archived"),
        }
    }
}

/// A curated group of signals with a generated summary.
///
/// `signal_count` mirrors the live number of member signals; the trend only
/// claims membership through each signal's `trend_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub id: TrendId,
    pub project_id: ProjectId,
    pub title: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub signal_count: u32,
    pub status: TrendStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendDetail {
    pub trend: Trend,
    #[serde(default)]
    pub members: Vec<Signal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrend {
    pub signal_ids: Vec<SignalId>,
}

/// Fresh title and summary from the external summarizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSummary {
    pub title: String,
    pub summary: String,
}

// --- Import ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    pub upload_id: Uuid,
    pub columns: Vec<String>,
    #[serde(default)]
    pub sample_rows: Vec<Vec<String>>,
    pub row_count: u32,
}

/// Which preview columns feed which signal fields. Only the text column is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    #[builder(setter(into))]
    pub text_column: String,
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_column: Option<String>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
}

impl ColumnMapping {
    /// Every named column exists in the preview header.
    pub fn fits(&self, columns: &[String]) -> Result<(), String> {
        let named = std::iter::once(&self.text_column)
            .chain(self.title_column.iter())
            .chain(self.source_column.iter());
        for column in named {
            if !columns.iter().any(|c| c == column) {
                return Err(format!("column '{column}' is not in the uploaded file"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReceipt {
    pub imported_count: u32,
}
