//! Re-enqueue matches that cleared their threshold but never got notified,
//! e.g. after a scoring-to-notification enqueue was lost.

use serde::Serialize;
use tracing::{info, warn};

use jobping_infra::store::{MatchRepository, PipelineStore};
use jobping_queue::{JobUserMessage, MessageBody, QueueId, QueueTransport};

use crate::error::StageError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub pending: usize,
    pub enqueued: usize,
    pub failed: usize,
}

/// Safe to run at any time: the Notification stage ignores pairs that are
/// already notified.
pub async fn requeue_pending_notifications(
    store: &dyn PipelineStore,
    queue: &dyn QueueTransport,
    notification_queue: &QueueId,
) -> Result<BackfillReport, StageError> {
    let pending = store.list_pending_notifications().await?;
    let mut report = BackfillReport {
        pending: pending.len(),
        ..BackfillReport::default()
    };

    for matched in &pending {
        let body = JobUserMessage {
            job_id: matched.job_id,
            user_id: matched.user_id,
        }
        .encode()?;

        match queue.send(notification_queue, body).await {
            Ok(_) => report.enqueued += 1,
            Err(err) => {
                report.failed += 1;
                warn!(match_id = %matched.id, error = %err, "failed to requeue notification");
            }
        }
    }

    info!(?report, "notification backfill finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use jobping_core::{
        JobId, MatchAnalysis, MatchScore, NotifyThreshold, User, UserJobMatch,
    };
    use jobping_infra::store::{InMemoryStore, UserRepository};
    use jobping_queue::InMemoryQueue;

    use super::*;

    #[tokio::test]
    async fn only_unnotified_matches_over_threshold_are_requeued() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        let user = User::new("ana")
            .with_prompt("rust")
            .with_threshold(NotifyThreshold::new(60).unwrap());
        store.insert_user(&user).await.unwrap();

        let due = UserJobMatch::new(user.id, JobId::new(), MatchScore::new(75).unwrap(), MatchAnalysis::new("due"));
        let low = UserJobMatch::new(user.id, JobId::new(), MatchScore::new(40).unwrap(), MatchAnalysis::new("low"));
        let done = UserJobMatch::new(user.id, JobId::new(), MatchScore::new(99).unwrap(), MatchAnalysis::new("done"));
        let done_id = done.id;
        let due_job = due.job_id;
        for m in [due, low, done] {
            store.insert_match_if_absent(m).await.unwrap();
        }
        store.mark_match_notified(done_id).await.unwrap();

        let notify = QueueId::new("notify");
        let report = requeue_pending_notifications(&store, &queue, &notify).await.unwrap();

        assert_eq!(
            report,
            BackfillReport {
                pending: 1,
                enqueued: 1,
                failed: 0
            }
        );
        let body = JobUserMessage::decode(&queue.peek_bodies(&notify)[0]).unwrap();
        assert_eq!(body.job_id, due_job);
    }
}
