use serde_json::{Value as JsonValue, json};

use jobping_core::{AnalysisSource, MatchAnalysis, MatchScore};

use crate::oracle::{MatchRequest, Oracle, OracleOutcome, ResearchRequest};
use crate::result::{AiError, MatchAssessment};

pub const PLACEHOLDER_SCORE: u8 = 65;

/// Oracle used when no real oracle is configured.
///
/// Every call succeeds with a fixed, clearly-marked placeholder wrapped in
/// `OracleOutcome::Unavailable`.
#[derive(Debug, Clone)]
pub struct PlaceholderOracle {
    reason: String,
}

impl Default for PlaceholderOracle {
    fn default() -> Self {
        Self::new("no oracle configured")
    }
}

impl PlaceholderOracle {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    pub fn research() -> JsonValue {
        json!({ "placeholder": true })
    }

    pub fn assessment(&self) -> MatchAssessment {
        MatchAssessment::new(
            MatchScore::clamped(i64::from(PLACEHOLDER_SCORE)),
            MatchAnalysis::new(format!("placeholder: {}", self.reason))
                .with_pros(vec!["job and employer are on record".to_string()])
                .with_cons(vec!["no real analysis performed".to_string()])
                .with_source(AnalysisSource::Placeholder),
        )
    }
}

#[async_trait::async_trait]
impl Oracle for PlaceholderOracle {
    async fn research_company(
        &self,
        _request: &ResearchRequest,
    ) -> Result<OracleOutcome<JsonValue>, AiError> {
        Ok(OracleOutcome::Unavailable {
            placeholder: Self::research(),
            reason: self.reason.clone(),
        })
    }

    async fn score_match(
        &self,
        _request: &MatchRequest,
    ) -> Result<OracleOutcome<MatchAssessment>, AiError> {
        Ok(OracleOutcome::Unavailable {
            placeholder: self.assessment(),
            reason: self.reason.clone(),
        })
    }
}
