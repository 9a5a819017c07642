use serde::{Deserialize, Serialize};
use thiserror::Error;

use jobping_core::{MatchAnalysis, MatchScore};

/// Oracle verdict on how well a job fits a user's prompt.
///
/// This is an insight, not a stored record: the scoring stage decides whether
/// and how it becomes a persisted match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchAssessment {
    pub score: MatchScore,
    pub analysis: MatchAnalysis,
}

impl MatchAssessment {
    pub fn new(score: MatchScore, analysis: MatchAnalysis) -> Self {
        Self { score, analysis }
    }
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("invalid oracle input: {0}")]
    InvalidInput(String),

    /// The oracle answered, but not with something usable (non-2xx, no choices).
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// The oracle could not be reached (connect, timeout, TLS).
    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AiError {
    /// Whether asking again later may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AiError::InvalidInput(_))
    }
}
