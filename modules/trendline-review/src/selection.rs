//! Focal signal plus ranked candidates, and the analyst's pick among them.

use std::collections::HashSet;

use trendline_common::{normalize_score, ScoreScale, Signal, SignalId, SimilarSignal};

use crate::error::{ReviewError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub signal: SimilarSignal,
    /// Normalized score, 0-100.
    pub percent: f64,
    pub scale: ScoreScale,
}

impl RankedCandidate {
    fn new(signal: SimilarSignal) -> Self {
        Self {
            percent: normalize_score(signal.score),
            scale: ScoreScale::of(signal.score),
            signal,
        }
    }

    pub fn id(&self) -> SignalId {
        self.signal.id
    }

    /// Candidates already in a trend are shown for context only.
    pub fn is_selectable(&self) -> bool {
        !self.signal.is_linked()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSelection {
    focal: Signal,
    candidates: Vec<RankedCandidate>,
    selected: HashSet<SignalId>,
}

impl CandidateSelection {
    /// Rank candidates by normalized score, highest first, ties by id. The
    /// focal signal and duplicate entries are dropped.
    pub fn new(focal: Signal, similar: Vec<SimilarSignal>) -> Self {
        let mut seen = HashSet::new();
        let mut candidates: Vec<RankedCandidate> = similar
            .into_iter()
            .filter(|c| c.id != focal.id && seen.insert(c.id))
            .map(RankedCandidate::new)
            .collect();
        candidates.sort_by(|a, b| {
            b.percent
                .total_cmp(&a.percent)
                .then_with(|| a.signal.id.cmp(&b.signal.id))
        });

        Self {
            focal,
            candidates,
            selected: HashSet::new(),
        }
    }

    pub fn focal(&self) -> &Signal {
        &self.focal
    }

    pub fn candidates(&self) -> &[RankedCandidate] {
        &self.candidates
    }

    pub fn candidate(&self, id: SignalId) -> Option<&RankedCandidate> {
        self.candidates.iter().find(|c| c.id() == id)
    }

    pub fn is_selected(&self, id: SignalId) -> bool {
        self.selected.contains(&id)
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    /// Flip one candidate in or out. Returns whether it is now selected.
    pub fn toggle(&mut self, id: SignalId) -> Result<bool> {
        if id == self.focal.id {
            return Err(ReviewError::Validation(
                "the signal under review is always part of the trend".into(),
            ));
        }
        let candidate = self
            .candidate(id)
            .ok_or_else(|| ReviewError::Validation(format!("signal {id} is not a candidate")))?;
        if !candidate.is_selectable() {
            return Err(ReviewError::TerminalState(format!(
                "\"{}\" already belongs to {}",
                candidate.signal.title.as_deref().unwrap_or(&candidate.signal.original_text),
                candidate
                    .signal
                    .trend_title
                    .as_deref()
                    .map(|t| format!("trend \"{t}\""))
                    .unwrap_or_else(|| "another trend".into())
            )));
        }

        if self.selected.remove(&id) {
            Ok(false)
        } else {
            self.selected.insert(id);
            Ok(true)
        }
    }

    pub fn select_all(&mut self) {
        self.selected = self
            .candidates
            .iter()
            .filter(|c| c.is_selectable())
            .map(RankedCandidate::id)
            .collect();
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Selected candidates in rank order.
    pub fn selected_ids(&self) -> Vec<SignalId> {
        self.candidates
            .iter()
            .map(RankedCandidate::id)
            .filter(|id| self.selected.contains(id))
            .collect()
    }

    /// Trend members: the focal signal first, then the selection in rank order.
    pub fn member_ids(&self) -> Vec<SignalId> {
        std::iter::once(self.focal.id)
            .chain(self.selected_ids())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trendline_common::SignalStatus;
    use uuid::Uuid;

    fn focal() -> Signal {
        Signal {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            original_text: "Four-day week pilots expand".into(),
            title: None,
            source: None,
            note: None,
            status: SignalStatus::Pending,
            trend_id: None,
            created_at: Utc::now(),
        }
    }

    fn candidate(text: &str, score: f64) -> SimilarSignal {
        SimilarSignal {
            id: Uuid::new_v4(),
            original_text: text.into(),
            title: None,
            source: None,
            status: SignalStatus::Pending,
            score,
            trend_id: None,
            trend_title: None,
        }
    }

    #[test]
    fn ranks_mixed_scales_by_normalized_score() {
        let low_cosine = candidate("cosine 0.55", 0.55);
        let high_verification = candidate("verification 9", 9.0);
        let perfect_cosine = candidate("cosine 1.0", 1.0);
        let mid_verification = candidate("verification 7", 7.0);
        let selection = CandidateSelection::new(
            focal(),
            vec![low_cosine, high_verification, perfect_cosine, mid_verification],
        );

        let order: Vec<&str> = selection
            .candidates()
            .iter()
            .map(|c| c.signal.original_text.as_str())
            .collect();
        assert_eq!(order, ["cosine 1.0", "verification 9", "verification 7", "cosine 0.55"]);
        assert_eq!(selection.candidates()[0].scale, ScoreScale::Cosine);
        assert_eq!(selection.candidates()[1].scale, ScoreScale::Verification);
    }

    #[test]
    fn focal_never_enters_candidates() {
        let f = focal();
        let mut echo = candidate("echo", 0.99);
        echo.id = f.id;
        let mut selection = CandidateSelection::new(f.clone(), vec![echo]);
        assert!(selection.candidates().is_empty());
        assert!(selection.toggle(f.id).is_err());
        assert_eq!(selection.member_ids(), vec![f.id]);
    }

    #[test]
    fn ranking_is_deterministic_on_ties() {
        let a = candidate("a", 0.8);
        let b = candidate("b", 8.0);
        let first = CandidateSelection::new(focal(), vec![a.clone(), b.clone()]);
        let second = CandidateSelection::new(first.focal().clone(), vec![b, a]);
        let ids = |s: &CandidateSelection| s.candidates().iter().map(|c| c.id()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn toggle_and_member_order() {
        let strong = candidate("strong", 9.0);
        let weak = candidate("weak", 0.4);
        let f = focal();
        let mut selection = CandidateSelection::new(f.clone(), vec![weak.clone(), strong.clone()]);

        assert!(selection.toggle(weak.id).unwrap());
        assert!(selection.toggle(strong.id).unwrap());
        assert_eq!(selection.member_ids(), vec![f.id, strong.id, weak.id]);

        assert!(!selection.toggle(strong.id).unwrap());
        assert_eq!(selection.selected_ids(), vec![weak.id]);
    }

    #[test]
    fn linked_candidates_are_not_selectable() {
        let mut linked = candidate("already grouped", 0.9);
        linked.status = SignalStatus::Combined;
        linked.trend_id = Some(Uuid::new_v4());
        linked.trend_title = Some("Remote work".into());
        let free = candidate("free", 0.7);
        let mut selection = CandidateSelection::new(focal(), vec![linked.clone(), free.clone()]);

        let err = selection.toggle(linked.id).unwrap_err();
        assert!(matches!(err, ReviewError::TerminalState(_)));
        assert!(err.to_string().contains("Remote work"));

        selection.select_all();
        assert_eq!(selection.selected_ids(), vec![free.id]);
        selection.clear();
        assert_eq!(selection.selected_count(), 0);
    }

    #[test]
    fn unknown_candidate_is_rejected() {
        let mut selection = CandidateSelection::new(focal(), vec![]);
        assert!(matches!(
            selection.toggle(Uuid::new_v4()),
            Err(ReviewError::Validation(_))
        ));
    }
}
