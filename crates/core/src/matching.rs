//! Match scores and the persisted (user, job) match record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{JobId, MatchId, UserId};
use crate::user::NotifyThreshold;

/// Relevance of a job for a user, on a 0–100 scale.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct MatchScore(u8);

impl MatchScore {
    pub const MAX: MatchScore = MatchScore(100);

    pub fn new(value: u8) -> Result<Self, DomainError> {
        if value > 100 {
            return Err(DomainError::validation(format!(
                "match score must be within 0..=100, got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Clamp an arbitrary integer (e.g. oracle output) into range.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, 100) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for MatchScore {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MatchScore> for u8 {
    fn from(value: MatchScore) -> Self {
        value.0
    }
}

impl core::fmt::Display for MatchScore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a match analysis came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    /// Parsed from a real oracle response.
    #[default]
    Oracle,
    /// Fixed placeholder used when no oracle is configured.
    Placeholder,
    /// The oracle answered but its output could not be parsed.
    Unparsed,
}

/// Structured explanation attached to a match.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchAnalysis {
    pub explanation: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub key_match_factors: Vec<String>,
    #[serde(default)]
    pub source: AnalysisSource,
    /// Raw oracle text, kept only when it could not be parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl MatchAnalysis {
    pub fn new(explanation: impl Into<String>) -> Self {
        Self {
            explanation: explanation.into(),
            ..Self::default()
        }
    }

    pub fn unparsed(raw: impl Into<String>) -> Self {
        Self {
            explanation: "oracle response could not be parsed".to_string(),
            source: AnalysisSource::Unparsed,
            raw: Some(raw.into()),
            ..Self::default()
        }
    }

    pub fn with_pros(mut self, pros: Vec<String>) -> Self {
        self.pros = pros;
        self
    }

    pub fn with_cons(mut self, cons: Vec<String>) -> Self {
        self.cons = cons;
        self
    }

    pub fn with_key_factors(mut self, factors: Vec<String>) -> Self {
        self.key_match_factors = factors;
        self
    }

    pub fn with_source(mut self, source: AnalysisSource) -> Self {
        self.source = source;
        self
    }
}

/// Persisted result of scoring one job for one user.
///
/// At most one exists per (user, job); `notified` only ever goes from
/// `false` to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserJobMatch {
    pub id: MatchId,
    pub user_id: UserId,
    pub job_id: JobId,
    pub score: MatchScore,
    pub analysis: MatchAnalysis,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

impl UserJobMatch {
    pub fn new(user_id: UserId, job_id: JobId, score: MatchScore, analysis: MatchAnalysis) -> Self {
        Self {
            id: MatchId::new(),
            user_id,
            job_id,
            score,
            analysis,
            notified: false,
            created_at: Utc::now(),
        }
    }

    /// Not yet notified and scoring at or above `threshold`.
    pub fn awaits_notification(&self, threshold: NotifyThreshold) -> bool {
        !self.notified && threshold.is_met_by(self.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn notified_matches_never_await_notification() {
        let mut m = UserJobMatch::new(
            UserId::new(),
            JobId::new(),
            MatchScore::MAX,
            MatchAnalysis::new("great fit"),
        );
        assert!(m.awaits_notification(NotifyThreshold::default()));

        m.notified = true;
        assert!(!m.awaits_notification(NotifyThreshold::default()));
    }

    #[test]
    fn unparsed_analysis_keeps_raw_text() {
        let a = MatchAnalysis::unparsed("not json");
        assert_eq!(a.source, AnalysisSource::Unparsed);
        assert_eq!(a.raw.as_deref(), Some("not json"));

        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["source"], "unparsed");
    }

    #[test]
    fn analysis_tolerates_missing_lists() {
        let a: MatchAnalysis = serde_json::from_str(r#"{"explanation":"ok"}"#).unwrap();
        assert!(a.pros.is_empty());
        assert_eq!(a.source, AnalysisSource::Oracle);
    }

    proptest! {
        #[test]
        fn clamped_scores_stay_in_range(raw in any::<i64>()) {
            let s = MatchScore::clamped(raw);
            prop_assert!(s.value() <= 100);
            if (0..=100).contains(&raw) {
                prop_assert_eq!(i64::from(s.value()), raw);
            }
        }
    }
}
