//! Notification dispatch: record the notification, deliver it, then mark the
//! match notified.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use jobping_core::Notification;
use jobping_infra::notify::NotificationSink;
use jobping_infra::store::{
    JobRepository, MatchRepository, NotificationRepository, PipelineStore, UserRepository,
};
use jobping_queue::JobUserMessage;

use crate::error::StageError;
use crate::stage::{DropReason, Stage, StageOutcome, StageProcessor};

pub struct NotificationDispatch {
    store: Arc<dyn PipelineStore>,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationDispatch {
    pub fn new(store: Arc<dyn PipelineStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    /// Permanent rejections are logged and swallowed; anything transient
    /// fails the message so it comes back.
    async fn deliver(&self, address: &str, notification: &Notification) -> Result<(), StageError> {
        match self.sink.deliver(address, notification).await {
            Ok(()) => {
                info!(notification_id = %notification.id, "notification delivered");
                Ok(())
            }
            Err(err) if !err.is_retryable() => {
                warn!(error = %err, "notification rejected by sink; not retrying");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait::async_trait]
impl StageProcessor for NotificationDispatch {
    type Message = JobUserMessage;

    const STAGE: Stage = Stage::Notification;

    #[instrument(skip(self), fields(job_id = %message.job_id, user_id = %message.user_id))]
    async fn process(&self, message: JobUserMessage) -> Result<StageOutcome, StageError> {
        let Some(user) = self.store.get_user(message.user_id).await? else {
            return Ok(StageOutcome::dropped(DropReason::UserNotFound));
        };
        let Some(job) = self.store.get_job(message.job_id).await? else {
            return Ok(StageOutcome::dropped(DropReason::JobNotFound));
        };
        let Some(matched) = self.store.get_match(user.id, job.id).await? else {
            return Ok(StageOutcome::dropped(DropReason::MatchNotFound));
        };
        if matched.notified {
            return Ok(StageOutcome::dropped(DropReason::AlreadyNotified));
        }

        let notification = Notification::snapshot(&job, &matched);
        self.store.create_notification(&notification).await?;

        match user.sink_address.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            Some(address) => self.deliver(address, &notification).await?,
            None => debug!("user has no sink address; notification recorded only"),
        }

        if !self.store.mark_match_notified(matched.id).await? {
            debug!(match_id = %matched.id, "match was already marked notified");
        }
        Ok(StageOutcome::Completed)
    }
}
