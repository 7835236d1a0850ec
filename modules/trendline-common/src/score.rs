/// How a raw similarity score was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreScale {
    /// 1-10 verification score.
    Verification,
    /// Cosine similarity in [0, 1].
    Cosine,
}

impl ScoreScale {
    /// Anything above 1 is a verification score. Exactly 1.0 is a perfect cosine.
    pub fn of(score: f64) -> Self {
        if score > 1.0 {
            ScoreScale::Verification
        } else {
            ScoreScale::Cosine
        }
    }
}

/// Map a raw score onto 0-100.
pub fn normalize_score(score: f64) -> f64 {
    match ScoreScale::of(score) {
        ScoreScale::Verification => (score / 10.0) * 100.0,
        ScoreScale::Cosine => score * 100.0,
    }
}

/// Normalized score rounded to a whole percent for display.
pub fn score_percent(score: f64) -> u32 {
    normalize_score(score).round().clamp(0.0, 100.0) as u32
}
