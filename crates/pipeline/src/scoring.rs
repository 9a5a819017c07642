//! Match scoring: score a job for one user at most once, and pass the pair
//! on to notification when the score clears the user's threshold.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use jobping_ai::{MatchRequest, Oracle, OracleOutcome};
use jobping_core::{Job, User, UserJobMatch};
use jobping_infra::store::{JobRepository, MatchRepository, PipelineStore, UserRepository};
use jobping_queue::{JobUserMessage, MessageBody, QueueId, QueueTransport};

use crate::error::StageError;
use crate::stage::{DropReason, Stage, StageOutcome, StageProcessor};

pub struct Scoring {
    store: Arc<dyn PipelineStore>,
    oracle: Arc<dyn Oracle>,
    queue: Arc<dyn QueueTransport>,
    forward_to: QueueId,
}

impl Scoring {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        oracle: Arc<dyn Oracle>,
        queue: Arc<dyn QueueTransport>,
        forward_to: QueueId,
    ) -> Self {
        Self {
            store,
            oracle,
            queue,
            forward_to,
        }
    }

    /// Consult the oracle and store the result unless another scorer got
    /// there first, in which case the stored match wins.
    async fn score(&self, job: &Job, user: &User, prompt: &str) -> Result<UserJobMatch, StageError> {
        let outcome = self.oracle.score_match(&MatchRequest::new(job, prompt)).await?;
        if let OracleOutcome::Unavailable { reason, .. } = &outcome {
            warn!(%reason, "scoring oracle unavailable; storing placeholder assessment");
        }
        let assessment = outcome.into_value();

        let candidate = UserJobMatch::new(user.id, job.id, assessment.score, assessment.analysis);
        let upsert = self.store.insert_match_if_absent(candidate).await?;
        let created = upsert.was_created();
        let stored = upsert.into_match();
        if created {
            info!(score = stored.score.value(), "match created");
        } else {
            debug!(score = stored.score.value(), "match was created concurrently; keeping stored one");
        }
        Ok(stored)
    }
}

#[async_trait::async_trait]
impl StageProcessor for Scoring {
    type Message = JobUserMessage;

    const STAGE: Stage = Stage::Scoring;

    #[instrument(skip(self), fields(job_id = %message.job_id, user_id = %message.user_id))]
    async fn process(&self, message: JobUserMessage) -> Result<StageOutcome, StageError> {
        let Some(job) = self.store.get_job(message.job_id).await? else {
            return Ok(StageOutcome::dropped(DropReason::JobNotFound));
        };
        let Some(user) = self.store.get_user(message.user_id).await? else {
            return Ok(StageOutcome::dropped(DropReason::UserNotFound));
        };
        let Some(prompt) = user.active_prompt() else {
            return Ok(StageOutcome::dropped(DropReason::NoMatchingPrompt));
        };

        let matched = match self.store.get_match(user.id, job.id).await? {
            Some(existing) => {
                debug!(
                    score = existing.score.value(),
                    notified = existing.notified,
                    "match already exists; not rescoring"
                );
                existing
            }
            None => self.score(&job, &user, prompt).await?,
        };

        if matched.notified {
            return Ok(StageOutcome::dropped(DropReason::AlreadyNotified));
        }
        if !user.notify_threshold.is_met_by(matched.score) {
            debug!(
                score = matched.score.value(),
                threshold = user.notify_threshold.value(),
                "score below threshold"
            );
            return Ok(StageOutcome::dropped(DropReason::BelowThreshold));
        }

        self.queue.send(&self.forward_to, message.encode()?).await?;
        Ok(StageOutcome::Forwarded { count: 1 })
    }
}
