//! Stage identity, outcomes, and the adapter that runs a stage on the
//! queue consumer engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use jobping_infra::config::QueueSettings;
use jobping_infra::workers::{FailureScope, MessageHandler};
use jobping_queue::{MessageBody, QueueId, ReceivedMessage};

use crate::error::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Enrichment,
    Fanout,
    Scoring,
    Notification,
}

impl Stage {
    /// In pipeline order.
    pub const ALL: [Stage; 4] = [
        Stage::Enrichment,
        Stage::Fanout,
        Stage::Scoring,
        Stage::Notification,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Enrichment => "enrichment",
            Stage::Fanout => "fanout",
            Stage::Scoring => "scoring",
            Stage::Notification => "notification",
        }
    }

    /// Retry granularity this stage runs with unless told otherwise.
    ///
    /// Enrichment is deployed host-invoked, so a failure fails its batch.
    /// The other stages poll for themselves and isolate each message.
    pub fn default_failure_scope(&self) -> FailureScope {
        match self {
            Stage::Enrichment => FailureScope::WholeBatch,
            Stage::Fanout | Stage::Scoring | Stage::Notification => FailureScope::PerMessage,
        }
    }

    /// The queue this stage consumes from.
    pub fn inbound_queue<'a>(&self, queues: &'a QueueSettings) -> &'a QueueId {
        match self {
            Stage::Enrichment => &queues.enrichment,
            Stage::Fanout => &queues.fanout,
            Stage::Scoring => &queues.scoring,
            Stage::Notification => &queues.notification,
        }
    }

    /// Parse a comma list such as `scoring,notification`, or `all`.
    pub fn parse_list(raw: &str) -> Result<Vec<Stage>, UnknownStage> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            return Ok(Stage::ALL.to_vec());
        }

        let mut stages = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let stage = part.parse()?;
            if !stages.contains(&stage) {
                stages.push(stage);
            }
        }
        Ok(stages)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enrichment" => Ok(Stage::Enrichment),
            "fanout" | "fan-out" => Ok(Stage::Fanout),
            "scoring" => Ok(Stage::Scoring),
            "notification" => Ok(Stage::Notification),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

/// Why a message was acknowledged without doing the stage's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    JobNotFound,
    UserNotFound,
    MatchNotFound,
    NoMatchingPrompt,
    AlreadyNotified,
    BelowThreshold,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::JobNotFound => "job_not_found",
            DropReason::UserNotFound => "user_not_found",
            DropReason::MatchNotFound => "match_not_found",
            DropReason::NoMatchingPrompt => "no_matching_prompt",
            DropReason::AlreadyNotified => "already_notified",
            DropReason::BelowThreshold => "below_threshold",
        }
    }

    /// Drops that point at inconsistent upstream data rather than normal flow.
    pub fn is_anomalous(&self) -> bool {
        !matches!(self, DropReason::AlreadyNotified | DropReason::BelowThreshold)
    }
}

/// What a stage did with one message. Every variant acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StageOutcome {
    /// `count` messages were sent downstream.
    Forwarded { count: usize },
    /// Work finished with nothing to send downstream.
    Completed,
    Dropped { reason: DropReason },
}

impl StageOutcome {
    pub fn dropped(reason: DropReason) -> Self {
        StageOutcome::Dropped { reason }
    }
}

/// One pipeline stage's business logic, fed decoded messages.
#[async_trait::async_trait]
pub trait StageProcessor: Send + Sync + 'static {
    type Message: MessageBody + fmt::Debug + Send + Sync + 'static;

    const STAGE: Stage;

    async fn process(&self, message: Self::Message) -> Result<StageOutcome, StageError>;
}

/// Binds a stage to the consumer engine: decode, process, log the outcome.
#[derive(Debug, Clone)]
pub struct StageHandler<P> {
    processor: P,
}

impl<P> StageHandler<P> {
    pub fn new(processor: P) -> Self {
        Self { processor }
    }
}

#[async_trait::async_trait]
impl<P> MessageHandler for StageHandler<P>
where
    P: StageProcessor,
{
    type Error = StageError;

    async fn handle(&self, message: &ReceivedMessage) -> Result<(), StageError> {
        let stage = P::STAGE.name();
        let body = P::Message::decode(&message.body)?;
        let outcome = self.processor.process(body).await?;

        match outcome {
            StageOutcome::Dropped { reason } if reason.is_anomalous() => {
                warn!(stage, reason = reason.as_str(), "message dropped")
            }
            StageOutcome::Dropped { reason } => {
                info!(stage, reason = reason.as_str(), "nothing further to do")
            }
            StageOutcome::Forwarded { count } => info!(stage, forwarded = count, "stage complete"),
            StageOutcome::Completed => info!(stage, "stage complete"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_lists_parse() {
        assert_eq!(Stage::parse_list("all").unwrap(), Stage::ALL.to_vec());
        assert_eq!(Stage::parse_list("").unwrap(), Stage::ALL.to_vec());
        assert_eq!(
            Stage::parse_list(" scoring, Fan-Out ,scoring").unwrap(),
            vec![Stage::Scoring, Stage::Fanout]
        );
        assert_eq!(
            Stage::parse_list("scoring,mail").unwrap_err(),
            UnknownStage("mail".to_string())
        );
    }

    #[test]
    fn only_enrichment_fails_whole_batches_by_default() {
        for stage in Stage::ALL {
            let expected = if stage == Stage::Enrichment {
                FailureScope::WholeBatch
            } else {
                FailureScope::PerMessage
            };
            assert_eq!(stage.default_failure_scope(), expected, "{stage}");
        }
    }

    #[test]
    fn each_stage_reads_its_own_queue() {
        let queues = QueueSettings::default();
        assert_eq!(Stage::Enrichment.inbound_queue(&queues).as_str(), "job-analysis-queue");
        assert_eq!(Stage::Fanout.inbound_queue(&queues).as_str(), "user-fanout-queue");
        assert_eq!(Stage::Scoring.inbound_queue(&queues).as_str(), "user-analysis-queue");
        assert_eq!(Stage::Notification.inbound_queue(&queues).as_str(), "notification-queue");
    }

    #[test]
    fn outcome_serializes_with_a_tag() {
        let json = serde_json::to_value(StageOutcome::dropped(DropReason::BelowThreshold)).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "dropped", "reason": "below_threshold"}));
    }

    proptest::proptest! {
        #[test]
        fn stage_lists_keep_first_occurrence_order(picks in proptest::collection::vec(0usize..4, 1..12)) {
            let raw = picks
                .iter()
                .map(|&i| Stage::ALL[i].name())
                .collect::<Vec<_>>()
                .join(",");
            let mut expected = Vec::new();
            for &i in &picks {
                if !expected.contains(&Stage::ALL[i]) {
                    expected.push(Stage::ALL[i]);
                }
            }
            proptest::prop_assert_eq!(Stage::parse_list(&raw).unwrap(), expected);
        }
    }
}
