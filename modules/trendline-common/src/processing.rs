use serde::{Deserialize, Serialize};

/// Named stage of the external processing pipeline for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Pending,
    Embeddings,
    EmbeddingSimilarities,
    ClaudeVerification,
    Complete,
    Error,
}

impl PipelinePhase {
    /// `Complete` and `Error` end the pipeline until an explicit resume or retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelinePhase::Complete | PipelinePhase::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            PipelinePhase::Pending => "waiting to start",
            PipelinePhase::Embeddings => "generating embeddings",
            PipelinePhase::EmbeddingSimilarities => "computing similarities",
            PipelinePhase::ClaudeVerification => "verifying matches",
            PipelinePhase::Complete => "complete",
            PipelinePhase::Error => "error",
        }
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelinePhase::Pending => "pending",
            PipelinePhase::Embeddings => "embeddings",
            PipelinePhase::EmbeddingSimilarities => "embedding_similarities",
            PipelinePhase::ClaudeVerification => "claude_verification",
            PipelinePhase::Complete => "complete",
            PipelinePhase::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Per-project pipeline progress. Counters only ever grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    pub status: PipelinePhase,
    pub total_signals: u32,
    pub embeddings_complete: u32,
    pub embedding_similarities_complete: u32,
    pub claude_verifications_complete: u32,
    #[serde(default)]
    pub claude_verification_failures: u32,
    #[serde(default)]
    pub percent_complete: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_seconds_remaining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProcessingStatus {
    /// Snapshot for a project with `total_signals` freshly imported signals.
    pub fn pending(total_signals: u32) -> Self {
        Self {
            status: PipelinePhase::Pending,
            total_signals,
            embeddings_complete: 0,
            embedding_similarities_complete: 0,
            claude_verifications_complete: 0,
            claude_verification_failures: 0,
            percent_complete: 0.0,
            estimated_seconds_remaining: None,
            error_message: None,
        }
    }

    /// The one completion predicate for the review gate.
    ///
    /// Either the named phase is terminal, or every phase counter has caught
    /// up with a non-zero signal total. The named phase can lag the counters,
    /// so the counters alone are enough. `Error` counts as complete: partial
    /// results stay reviewable.
    pub fn is_complete(&self) -> bool {
        self.status.is_terminal() || self.counters_complete()
    }

    /// All three phase counters have reached `total_signals`.
    pub fn counters_complete(&self) -> bool {
        self.total_signals > 0
            && self.embeddings_complete >= self.total_signals
            && self.embedding_similarities_complete >= self.total_signals
            && self.claude_verifications_complete >= self.total_signals
    }

    pub fn is_error(&self) -> bool {
        self.status == PipelinePhase::Error
    }

    pub fn has_failed_verifications(&self) -> bool {
        self.claude_verification_failures > 0
    }

    /// One-line human summary: phase, percent, counters, and ETA when known.
    pub fn progress_line(&self) -> String {
        let mut line = format!(
            "{} ({:.0}%): embeddings {}/{}, similarities {}/{}, verifications {}/{}",
            self.status.label(),
            self.percent_complete.clamp(0.0, 100.0),
            self.embeddings_complete,
            self.total_signals,
            self.embedding_similarities_complete,
            self.total_signals,
            self.claude_verifications_complete,
            self.total_signals,
        );
        if self.claude_verification_failures > 0 {
            line.push_str(&format!(", {} failed", self.claude_verification_failures));
        }
        if let Some(secs) = self.estimated_seconds_remaining.filter(|_| !self.is_complete()) {
            line.push_str(&format!(", ~{} remaining", format_eta(secs)));
        }
        if let Some(msg) = &self.error_message {
            line.push_str(&format!(" [{msg}]"));
        }
        line
    }
}

fn format_eta(secs: u64) -> String {
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(phase: PipelinePhase, total: u32, e: u32, s: u32, v: u32) -> ProcessingStatus {
        ProcessingStatus {
            status: phase,
            total_signals: total,
            embeddings_complete: e,
            embedding_similarities_complete: s,
            claude_verifications_complete: v,
            ..ProcessingStatus::pending(total)
        }
    }

    #[test]
    fn counters_complete_while_phase_lags() {
        let s = status(PipelinePhase::ClaudeVerification, 3, 3, 3, 3);
        assert!(s.is_complete());
    }

    #[test]
    fn named_terminal_phases_complete_regardless_of_counters() {
        assert!(status(PipelinePhase::Complete, 10, 0, 0, 0).is_complete());
        assert!(status(PipelinePhase::Error, 10, 4, 1, 0).is_complete());
    }

    #[test]
    fn one_lagging_counter_keeps_it_incomplete() {
        assert!(!status(PipelinePhase::ClaudeVerification, 3, 3, 3, 2).is_complete());
        assert!(!status(PipelinePhase::EmbeddingSimilarities, 3, 3, 2, 3).is_complete());
        assert!(!status(PipelinePhase::Embeddings, 3, 2, 3, 3).is_complete());
    }

    #[test]
    fn zero_total_is_not_complete_by_counters() {
        assert!(!status(PipelinePhase::Pending, 0, 0, 0, 0).is_complete());
    }

    #[test]
    fn counters_past_total_still_complete() {
        assert!(status(PipelinePhase::Embeddings, 2, 3, 2, 5).is_complete());
    }

    #[test]
    fn deserializes_wire_format() {
        let json = r#"{
            "status": "claude_verification",
            "totalSignals": 3,
            "embeddingsComplete": 3,
            "embeddingSimilaritiesComplete": 3,
            "claudeVerificationsComplete": 3,
            "claudeVerificationFailures": 0,
            "percentComplete": 100.0,
            "estimatedSecondsRemaining": null
        }"#;
        let s: ProcessingStatus = serde_json::from_str(json).unwrap();
        assert_eq!(s.status, PipelinePhase::ClaudeVerification);
        assert!(s.is_complete());
    }

    #[test]
    fn progress_line_mentions_failures_and_eta() {
        let mut s = status(PipelinePhase::ClaudeVerification, 10, 10, 10, 4);
        s.percent_complete = 80.0;
        s.claude_verification_failures = 2;
        s.estimated_seconds_remaining = Some(95);
        let line = s.progress_line();
        assert!(line.starts_with("verifying matches (80%)"));
        assert!(line.contains("verifications 4/10"));
        assert!(line.contains("2 failed"));
        assert!(line.contains("~1m 35s remaining"));
    }
}
