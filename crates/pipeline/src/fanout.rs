//! User fan-out: one scoring work item per user with a matching prompt.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use jobping_core::JobId;
use jobping_infra::store::{PipelineStore, UserRepository};
use jobping_queue::{JobMessage, JobUserMessage, MessageBody, QueueId, QueueTransport};

use crate::error::StageError;
use crate::stage::{Stage, StageOutcome, StageProcessor};

pub struct FanOut {
    store: Arc<dyn PipelineStore>,
    queue: Arc<dyn QueueTransport>,
    forward_to: QueueId,
}

impl FanOut {
    pub fn new(store: Arc<dyn PipelineStore>, queue: Arc<dyn QueueTransport>, forward_to: QueueId) -> Self {
        Self {
            store,
            queue,
            forward_to,
        }
    }

    /// Enqueue `(job, user)` for every eligible user and return how many were
    /// enqueued. A failed enqueue is logged and skipped; rerunning is safe.
    pub async fn fan_out(&self, job_id: JobId) -> Result<usize, StageError> {
        let users = self.store.list_users_with_prompt().await?;

        let mut targeted = 0;
        for user in users.iter().filter(|u| u.active_prompt().is_some()) {
            let body = JobUserMessage {
                job_id,
                user_id: user.id,
            }
            .encode()?;

            match self.queue.send(&self.forward_to, body).await {
                Ok(_) => targeted += 1,
                Err(err) => warn!(user_id = %user.id, error = %err, "failed to enqueue scoring work"),
            }
        }

        info!(candidates = users.len(), targeted, "fan-out finished");
        Ok(targeted)
    }
}

#[async_trait::async_trait]
impl StageProcessor for FanOut {
    type Message = JobMessage;

    const STAGE: Stage = Stage::Fanout;

    #[instrument(skip(self), fields(job_id = %message.job_id))]
    async fn process(&self, message: JobMessage) -> Result<StageOutcome, StageError> {
        let count = self.fan_out(message.job_id).await?;
        Ok(StageOutcome::Forwarded { count })
    }
}
