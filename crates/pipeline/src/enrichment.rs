//! Company enrichment: make sure a job carries fresh company research, then
//! hand the job to fan-out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use jobping_ai::{Oracle, OracleOutcome, ResearchRequest};
use jobping_core::{CompanyResearch, Job, JobStatus, ResearchPolicy};
use jobping_infra::store::{JobRepository, PipelineStore};
use jobping_queue::{JobMessage, MessageBody, QueueId, QueueTransport};

use crate::error::StageError;
use crate::stage::{DropReason, Stage, StageOutcome, StageProcessor};

pub struct Enrichment {
    store: Arc<dyn PipelineStore>,
    oracle: Arc<dyn Oracle>,
    queue: Arc<dyn QueueTransport>,
    forward_to: QueueId,
    policy: ResearchPolicy,
}

impl Enrichment {
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
            policy: ResearchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ResearchPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn research_is_fresh(&self, job: &Job, now: DateTime<Utc>) -> bool {
        match self.store.is_research_fresh(job.id, self.policy, now).await {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(error = %err, "freshness check failed; treating research as stale");
                false
            }
        }
    }

    /// Ask the oracle for research and store it. Placeholder answers are
    /// not stored.
    async fn refresh_research(&self, job: &Job, now: DateTime<Utc>) -> Result<(), StageError> {
        let outcome = self
            .oracle
            .research_company(&ResearchRequest::for_job(job))
            .await?;

        match outcome {
            OracleOutcome::Available(facts) => {
                let research = CompanyResearch {
                    facts,
                    researched_at: now,
                };
                match self.store.save_company_research(job.id, &research).await {
                    Ok(()) => info!(employer = %job.employer, "company research saved"),
                    Err(err) => warn!(error = %err, "failed to save company research; continuing"),
                }
            }
            OracleOutcome::Unavailable { reason, .. } => {
                info!(%reason, "research oracle unavailable; leaving research unset")
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StageProcessor for Enrichment {
    type Message = JobMessage;

    const STAGE: Stage = Stage::Enrichment;

    #[instrument(skip(self), fields(job_id = %message.job_id))]
    async fn process(&self, message: JobMessage) -> Result<StageOutcome, StageError> {
        let Some(job) = self.store.get_job(message.job_id).await? else {
            return Ok(StageOutcome::dropped(DropReason::JobNotFound));
        };

        let now = Utc::now();
        if self.research_is_fresh(&job, now).await {
            debug!("company research is fresh");
        } else {
            self.refresh_research(&job, now).await?;
        }

        self.queue.send(&self.forward_to, message.encode()?).await?;

        if let Err(err) = self.store.set_job_status(job.id, JobStatus::Processed).await {
            warn!(error = %err, "failed to mark job processed");
        }

        Ok(StageOutcome::Forwarded { count: 1 })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Months;
    use jobping_ai::ScriptedOracle;
    use jobping_ai::PlaceholderOracle;
    use jobping_infra::store::InMemoryStore;
    use jobping_queue::InMemoryQueue;
    use serde_json::json;

    use super::*;

    struct Fixture {
        store: Arc<InMemoryStore>,
        oracle: Arc<ScriptedOracle>,
        queue: Arc<InMemoryQueue>,
        stage: Enrichment,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let oracle = Arc::new(ScriptedOracle::new(80).with_research(json!({"industry": "fintech"})));
        let queue = Arc::new(InMemoryQueue::new());
        let stage = Enrichment::new(store.clone(), oracle.clone(), queue.clone(), fanout());
        Fixture {
            store,
            oracle,
            queue,
            stage,
        }
    }

    fn fanout() -> QueueId {
        QueueId::new("fanout")
    }

    fn job() -> Job {
        Job::new("Data Engineer", "Ledgerly", "Pipelines and ledgers", "https://ledgerly.test/1")
    }

    #[tokio::test]
    async fn missing_research_is_fetched_and_job_forwarded() {
        let f = fixture();
        let job = job();
        f.store.insert_job(&job).await.unwrap();

        let before = Utc::now();
        let outcome = f.stage.process(JobMessage { job_id: job.id }).await.unwrap();

        assert_eq!(outcome, StageOutcome::Forwarded { count: 1 });
        assert_eq!(f.oracle.research_calls(), 1);
        let stored = f.store.get_job(job.id).await.unwrap().unwrap();
        let research = stored.company_research.unwrap();
        assert_eq!(research.facts, json!({"industry": "fintech"}));
        assert!(research.researched_at >= before);
        assert_eq!(stored.status, JobStatus::Processed);
        assert_eq!(f.queue.depth(&fanout()), 1);
    }

    #[tokio::test]
    async fn fresh_research_skips_the_oracle() {
        let f = fixture();
        let job = job().with_research(json!({"cached": true}), Utc::now());
        f.store.insert_job(&job).await.unwrap();

        f.stage.process(JobMessage { job_id: job.id }).await.unwrap();

        assert_eq!(f.oracle.research_calls(), 0);
        assert_eq!(f.queue.depth(&fanout()), 1);
    }

    #[tokio::test]
    async fn stale_research_is_refreshed() {
        let f = fixture();
        let old = Utc::now().checked_sub_months(Months::new(7)).unwrap();
        let job = job().with_research(json!({"cached": true}), old);
        f.store.insert_job(&job).await.unwrap();

        f.stage.process(JobMessage { job_id: job.id }).await.unwrap();

        assert_eq!(f.oracle.research_calls(), 1);
        let stored = f.store.get_job(job.id).await.unwrap().unwrap();
        assert!(stored.company_research.unwrap().researched_at > old);
    }

    #[tokio::test]
    async fn oracle_outage_fails_without_forwarding() {
        let f = fixture();
        let job = job();
        f.store.insert_job(&job).await.unwrap();
        f.oracle.set_outage(Some("connection refused"));

        let err = f.stage.process(JobMessage { job_id: job.id }).await.unwrap_err();

        assert!(matches!(err, StageError::Oracle(_)));
        assert_eq!(f.queue.depth(&fanout()), 0);
    }

    #[tokio::test]
    async fn placeholder_research_is_not_stored() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let stage = Enrichment::new(
            store.clone(),
            Arc::new(PlaceholderOracle::default()),
            queue.clone(),
            fanout(),
        );
        let job = job();
        store.insert_job(&job).await.unwrap();

        let outcome = stage.process(JobMessage { job_id: job.id }).await.unwrap();

        assert_eq!(outcome, StageOutcome::Forwarded { count: 1 });
        assert!(store.get_job(job.id).await.unwrap().unwrap().company_research.is_none());
    }

    #[tokio::test]
    async fn unknown_job_is_dropped() {
        let f = fixture();
        let outcome = f
            .stage
            .process(JobMessage {
                job_id: jobping_core::JobId::new(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, StageOutcome::dropped(DropReason::JobNotFound));
        assert_eq!(f.oracle.research_calls(), 0);
        assert_eq!(f.queue.depth(&fanout()), 0);
    }
}
