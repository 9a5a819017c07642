//! Wiring: the four stages over one store, oracle, queue transport and sink.

use std::sync::Arc;

use tracing::info;

use jobping_ai::Oracle;
use jobping_core::ResearchPolicy;
use jobping_infra::config::QueueSettings;
use jobping_infra::notify::NotificationSink;
use jobping_infra::store::PipelineStore;
use jobping_infra::workers::{
    BatchError, ConsumerConfig, ConsumerHandle, CycleReport, FailureScope, MessageHandler,
    QueueConsumer, process_batch,
};
use jobping_queue::{QueueError, QueueId, QueueTransport, ReceivedMessage};

use crate::backfill::{BackfillReport, requeue_pending_notifications};
use crate::enrichment::Enrichment;
use crate::error::StageError;
use crate::fanout::FanOut;
use crate::notification::NotificationDispatch;
use crate::scoring::Scoring;
use crate::stage::{Stage, StageHandler};

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn PipelineStore>,
    oracle: Arc<dyn Oracle>,
    queue: Arc<dyn QueueTransport>,
    sink: Arc<dyn NotificationSink>,
    queues: QueueSettings,
    research: ResearchPolicy,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        oracle: Arc<dyn Oracle>,
        queue: Arc<dyn QueueTransport>,
        sink: Arc<dyn NotificationSink>,
        queues: QueueSettings,
    ) -> Self {
        Self {
            store,
            oracle,
            queue,
            sink,
            queues,
            research: ResearchPolicy::default(),
        }
    }

    pub fn with_research_policy(mut self, policy: ResearchPolicy) -> Self {
        self.research = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn QueueTransport> {
        &self.queue
    }

    pub fn queues(&self) -> &QueueSettings {
        &self.queues
    }

    pub fn inbound_queue(&self, stage: Stage) -> &QueueId {
        stage.inbound_queue(&self.queues)
    }

    pub fn enrichment(&self) -> Enrichment {
        Enrichment::new(
            self.store.clone(),
            self.oracle.clone(),
            self.queue.clone(),
            self.queues.fanout.clone(),
        )
        .with_policy(self.research)
    }

    pub fn fanout(&self) -> FanOut {
        FanOut::new(self.store.clone(), self.queue.clone(), self.queues.scoring.clone())
    }

    pub fn scoring(&self) -> Scoring {
        Scoring::new(
            self.store.clone(),
            self.oracle.clone(),
            self.queue.clone(),
            self.queues.notification.clone(),
        )
    }

    pub fn notification(&self) -> NotificationDispatch {
        NotificationDispatch::new(self.store.clone(), self.sink.clone())
    }

    /// Host-invoked shape: run one delivered batch through `stage`, failing
    /// the whole batch on the first message that fails.
    pub async fn invoke_batch(
        &self,
        stage: Stage,
        batch: &[ReceivedMessage],
    ) -> Result<usize, BatchError<StageError>> {
        let queue = self.inbound_queue(stage);
        match stage {
            Stage::Enrichment => process_batch(&StageHandler::new(self.enrichment()), queue, batch).await,
            Stage::Fanout => process_batch(&StageHandler::new(self.fanout()), queue, batch).await,
            Stage::Scoring => process_batch(&StageHandler::new(self.scoring()), queue, batch).await,
            Stage::Notification => {
                process_batch(&StageHandler::new(self.notification()), queue, batch).await
            }
        }
    }

    fn consumer_config(&self, stage: Stage, scope: FailureScope) -> ConsumerConfig {
        ConsumerConfig::new(stage.name(), self.inbound_queue(stage).clone())
            .with_receive_options(self.queues.receive_options())
            .with_poll_interval(self.queues.poll_interval)
            .with_failure_scope(scope)
    }

    fn consumer<H: MessageHandler>(
        &self,
        stage: Stage,
        scope: FailureScope,
        handler: H,
    ) -> QueueConsumer<dyn QueueTransport, H> {
        QueueConsumer::new(self.queue.clone(), handler, self.consumer_config(stage, scope))
    }

    /// One receive-and-dispatch cycle for `stage` with its default scope.
    pub async fn poll_stage_once(&self, stage: Stage) -> Result<CycleReport, QueueError> {
        let scope = stage.default_failure_scope();
        match stage {
            Stage::Enrichment => {
                self.consumer(stage, scope, StageHandler::new(self.enrichment()))
                    .poll_once()
                    .await
            }
            Stage::Fanout => {
                self.consumer(stage, scope, StageHandler::new(self.fanout()))
                    .poll_once()
                    .await
            }
            Stage::Scoring => {
                self.consumer(stage, scope, StageHandler::new(self.scoring()))
                    .poll_once()
                    .await
            }
            Stage::Notification => {
                self.consumer(stage, scope, StageHandler::new(self.notification()))
                    .poll_once()
                    .await
            }
        }
    }

    /// Start a self-polling consumer for `stage`.
    pub fn spawn_consumer(&self, stage: Stage, scope: FailureScope) -> ConsumerHandle {
        info!(stage = stage.name(), ?scope, queue = %self.inbound_queue(stage), "starting consumer");
        match stage {
            Stage::Enrichment => self.consumer(stage, scope, StageHandler::new(self.enrichment())).spawn(),
            Stage::Fanout => self.consumer(stage, scope, StageHandler::new(self.fanout())).spawn(),
            Stage::Scoring => self.consumer(stage, scope, StageHandler::new(self.scoring())).spawn(),
            Stage::Notification => {
                self.consumer(stage, scope, StageHandler::new(self.notification())).spawn()
            }
        }
    }

    /// Start one consumer per stage, each with its default failure scope.
    pub fn spawn_consumers(&self, stages: &[Stage]) -> Vec<ConsumerHandle> {
        stages
            .iter()
            .map(|stage| self.spawn_consumer(*stage, stage.default_failure_scope()))
            .collect()
    }

    pub async fn requeue_pending_notifications(&self) -> Result<BackfillReport, StageError> {
        requeue_pending_notifications(self.store.as_ref(), self.queue.as_ref(), &self.queues.notification)
            .await
    }
}
