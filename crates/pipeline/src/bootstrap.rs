//! Build a `Pipeline` from `Settings`, picking real backends when they are
//! configured and in-memory stand-ins otherwise.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use jobping_ai::{AiError, OpenAiConfig, OpenAiOracle, Oracle, PlaceholderOracle};
use jobping_infra::config::{Settings, SinkKind};
use jobping_infra::notify::{LogSink, NotificationSink, SinkError, WebhookSink};
use jobping_infra::store::{InMemoryStore, PipelineStore, PostgresStore, StoreError};
use jobping_queue::{InMemoryQueue, QueueError, QueueTransport};

use crate::pipeline::Pipeline;

const DB_MAX_CONNECTIONS: u32 = 10;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("queue: {0}")]
    Queue(#[from] QueueError),

    #[error("oracle: {0}")]
    Oracle(#[from] AiError),

    #[error("sink: {0}")]
    Sink(#[from] SinkError),

    #[error("REDIS_URL is set but this binary was built without the `redis` feature")]
    RedisUnsupported,
}

pub async fn build_store(settings: &Settings) -> Result<Arc<dyn PipelineStore>, BootstrapError> {
    match settings.database_url.as_deref() {
        Some(url) => {
            let store = PostgresStore::connect(url, DB_MAX_CONNECTIONS).await?;
            store.ensure_schema().await?;
            info!("using postgres store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

pub fn build_queue(settings: &Settings) -> Result<Arc<dyn QueueTransport>, BootstrapError> {
    match settings.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => {
            info!("using redis streams queues");
            Ok(Arc::new(jobping_infra::queue::RedisStreamsQueue::new(url)?))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(BootstrapError::RedisUnsupported),
        None => {
            warn!("REDIS_URL not set; using in-process queues");
            Ok(Arc::new(InMemoryQueue::new()))
        }
    }
}

pub fn build_oracle(settings: &Settings) -> Result<Arc<dyn Oracle>, BootstrapError> {
    match settings.oracle.api_key.as_deref() {
        Some(key) => {
            let config = OpenAiConfig::new(key)
                .with_model(settings.oracle.model.clone())
                .with_base_url(settings.oracle.base_url.clone());
            info!(model = %settings.oracle.model, "using openai oracle");
            Ok(Arc::new(OpenAiOracle::new(config)?))
        }
        None => {
            warn!("OPENAI_API_KEY not set; oracle answers will be placeholders");
            Ok(Arc::new(PlaceholderOracle::default()))
        }
    }
}

pub fn build_sink(settings: &Settings) -> Result<Arc<dyn NotificationSink>, BootstrapError> {
    match settings.sink {
        SinkKind::Log => Ok(Arc::new(LogSink)),
        SinkKind::Webhook => Ok(Arc::new(WebhookSink::new(WEBHOOK_TIMEOUT)?)),
    }
}

pub async fn build_pipeline(settings: &Settings) -> Result<Pipeline, BootstrapError> {
    Ok(Pipeline::new(
        build_store(settings).await?,
        build_oracle(settings)?,
        build_queue(settings)?,
        build_sink(settings)?,
        settings.queues.clone(),
    )
    .with_research_policy(settings.research))
}
