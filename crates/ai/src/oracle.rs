//! The oracle boundary: company research and match scoring.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobping_core::Job;

use crate::result::{AiError, MatchAssessment};

/// Result of an oracle call that may have been served by a placeholder.
///
/// `Unavailable` carries a usable stand-in value plus the reason no real
/// answer was produced, so callers can choose whether to persist it.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleOutcome<T> {
    Available(T),
    Unavailable { placeholder: T, reason: String },
}

impl<T> OracleOutcome<T> {
    /// The answer, real or stand-in.
    pub fn into_value(self) -> T {
        match self {
            OracleOutcome::Available(v) => v,
            OracleOutcome::Unavailable { placeholder, .. } => placeholder,
        }
    }
}

/// Input for company research.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub employer: String,
    pub title: String,
    pub description: String,
}

impl ResearchRequest {
    pub fn for_job(job: &Job) -> Self {
        Self {
            employer: job.employer.clone(),
            title: job.title.clone(),
            description: job.description.clone(),
        }
    }
}

/// Input for scoring one job against one user's matching prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub title: String,
    pub employer: String,
    pub description: String,
    pub company_research: Option<JsonValue>,
    pub prompt: String,
}

impl MatchRequest {
    pub fn new(job: &Job, prompt: impl Into<String>) -> Self {
        Self {
            title: job.title.clone(),
            employer: job.employer.clone(),
            description: job.description.clone(),
            company_research: job.company_research.as_ref().map(|r| r.facts.clone()),
            prompt: prompt.into(),
        }
    }
}

/// External analysis capability used by Enrichment and Scoring.
///
/// `Err` means the oracle could not be consulted at all and the caller should
/// fail the current message. `Ok(Unavailable)` means a placeholder stood in.
#[async_trait::async_trait]
pub trait Oracle: Send + Sync {
    async fn research_company(
        &self,
        request: &ResearchRequest,
    ) -> Result<OracleOutcome<JsonValue>, AiError>;

    async fn score_match(
        &self,
        request: &MatchRequest,
    ) -> Result<OracleOutcome<MatchAssessment>, AiError>;
}

#[async_trait::async_trait]
impl<O> Oracle for Arc<O>
where
    O: Oracle + ?Sized,
{
    async fn research_company(
        &self,
        request: &ResearchRequest,
    ) -> Result<OracleOutcome<JsonValue>, AiError> {
        (**self).research_company(request).await
    }

    async fn score_match(
        &self,
        request: &MatchRequest,
    ) -> Result<OracleOutcome<MatchAssessment>, AiError> {
        (**self).score_match(request).await
    }
}
