//! Deterministic oracle for tests and local runs.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value as JsonValue, json};

use jobping_core::{MatchAnalysis, MatchScore};

use crate::oracle::{MatchRequest, Oracle, OracleOutcome, ResearchRequest};
use crate::result::{AiError, MatchAssessment};

/// Answers every call with a configured score and research blob, counting
/// calls. Can be switched into a failing mode.
#[derive(Debug)]
pub struct ScriptedOracle {
    score: Mutex<u8>,
    research: Mutex<JsonValue>,
    outage: Mutex<Option<String>>,
    research_calls: AtomicUsize,
    score_calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(score: u8) -> Self {
        Self {
            score: Mutex::new(score),
            research: Mutex::new(json!({ "industry": "software", "size": "mid" })),
            outage: Mutex::new(None),
            research_calls: AtomicUsize::new(0),
            score_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_research(self, facts: JsonValue) -> Self {
        if let Ok(mut research) = self.research.lock() {
            *research = facts;
        }
        self
    }

    pub fn set_score(&self, score: u8) {
        if let Ok(mut current) = self.score.lock() {
            *current = score;
        }
    }

    /// While set, every call fails with a transport error carrying `reason`.
    pub fn set_outage(&self, reason: Option<&str>) {
        if let Ok(mut outage) = self.outage.lock() {
            *outage = reason.map(str::to_string);
        }
    }

    pub fn research_calls(&self) -> usize {
        self.research_calls.load(Ordering::SeqCst)
    }

    pub fn score_calls(&self) -> usize {
        self.score_calls.load(Ordering::SeqCst)
    }

    fn check_outage(&self) -> Result<(), AiError> {
        let outage = self
            .outage
            .lock()
            .map_err(|_| AiError::Internal("scripted oracle poisoned".to_string()))?;
        match outage.as_ref() {
            Some(reason) => Err(AiError::Transport(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Oracle for ScriptedOracle {
    async fn research_company(
        &self,
        _request: &ResearchRequest,
    ) -> Result<OracleOutcome<JsonValue>, AiError> {
        self.research_calls.fetch_add(1, Ordering::SeqCst);
        self.check_outage()?;
        let facts = self
            .research
            .lock()
            .map_err(|_| AiError::Internal("scripted oracle poisoned".to_string()))?
            .clone();
        Ok(OracleOutcome::Available(facts))
    }

    async fn score_match(
        &self,
        request: &MatchRequest,
    ) -> Result<OracleOutcome<MatchAssessment>, AiError> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        self.check_outage()?;
        let score = *self
            .score
            .lock()
            .map_err(|_| AiError::Internal("scripted oracle poisoned".to_string()))?;
        Ok(OracleOutcome::Available(MatchAssessment::new(
            MatchScore::clamped(i64::from(score)),
            MatchAnalysis::new(format!("scripted match for \"{}\"", request.prompt))
                .with_pros(vec![format!("{} at {}", request.title, request.employer)])
                .with_cons(vec!["scripted".to_string()]),
        )))
    }
}
