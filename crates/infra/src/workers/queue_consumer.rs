use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use jobping_queue::{QueueError, QueueId, QueueTransport, ReceiveOptions, ReceivedMessage};

/// Classifies a handler failure as worth retrying or not.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Processes one message. Must be idempotent: the same message may arrive
/// more than once.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Error: std::error::Error + Retryable + Send + Sync + 'static;

    async fn handle(&self, message: &ReceivedMessage) -> Result<(), Self::Error>;
}

#[async_trait::async_trait]
impl<H> MessageHandler for Arc<H>
where
    H: MessageHandler,
{
    type Error = H::Error;

    async fn handle(&self, message: &ReceivedMessage) -> Result<(), Self::Error> {
        (**self).handle(message).await
    }
}

/// How a handler failure affects the rest of a received batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureScope {
    /// Each message stands alone: successes are deleted, retryable failures
    /// stay for redelivery, non-retryable failures are dropped.
    PerMessage,
    /// Messages run in order and the batch stops at the first failure.
    /// Messages handled before it are deleted, a non-retryable failure is
    /// dropped, and everything after it stays for redelivery.
    WholeBatch,
}

/// Consumer loop configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Name for logging
    pub name: String,
    pub queue: QueueId,
    pub receive: ReceiveOptions,
    /// Sleep after an empty receive or a receive error
    pub poll_interval: Duration,
    pub failure_scope: FailureScope,
}

impl ConsumerConfig {
    pub fn new(name: impl Into<String>, queue: QueueId) -> Self {
        Self {
            name: name.into(),
            queue,
            receive: ReceiveOptions::default(),
            poll_interval: Duration::from_secs(5),
            failure_scope: FailureScope::PerMessage,
        }
    }

    pub fn with_receive_options(mut self, receive: ReceiveOptions) -> Self {
        self.receive = receive;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_failure_scope(mut self, scope: FailureScope) -> Self {
        self.failure_scope = scope;
        self
    }
}

/// What happened to one received batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub received: usize,
    pub succeeded: usize,
    /// Non-retryable failures that were deleted anyway.
    pub dropped: usize,
    /// Failures left in the queue for redelivery.
    pub retained: usize,
    pub deleted: usize,
    pub delete_failures: usize,
}

/// A whole-batch failure, naming the message that caused it.
#[derive(Debug, Error)]
#[error("batch failed at message {message_id} after {processed} succeeded: {source}")]
pub struct BatchError<E>
where
    E: std::error::Error + 'static,
{
    pub message_id: String,
    pub processed: usize,
    #[source]
    pub source: E,
}

fn message_span(queue: &QueueId, message: &ReceivedMessage) -> Span {
    info_span!(
        "queue_message",
        queue = %queue,
        message_id = %message.message_id,
        receive_count = message.receive_count,
    )
}

/// Run `handler` over `batch` in order, stopping at the first failure.
///
/// This is the host-invoked shape: the caller reports failure to whatever
/// delivered the batch and that host decides about redelivery.
pub async fn process_batch<H>(
    handler: &H,
    queue: &QueueId,
    batch: &[ReceivedMessage],
) -> Result<usize, BatchError<H::Error>>
where
    H: MessageHandler + ?Sized,
{
    let mut processed = 0;
    for message in batch {
        if let Err(source) = handler
            .handle(message)
            .instrument(message_span(queue, message))
            .await
        {
            return Err(BatchError {
                message_id: message.message_id.clone(),
                processed,
                source,
            });
        }
        processed += 1;
    }
    Ok(processed)
}

/// Handle to control and join a spawned consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request graceful shutdown and wait for the loop to stop.
    ///
    /// A batch already being processed is finished first.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(j) = self.join.take() {
            let _ = j.await;
        }
    }
}

/// Self-polling consumer: receive, dispatch, delete, repeat.
pub struct QueueConsumer<T: ?Sized, H> {
    transport: Arc<T>,
    handler: H,
    config: ConsumerConfig,
}

impl<T, H> QueueConsumer<T, H>
where
    T: QueueTransport + ?Sized + 'static,
    H: MessageHandler,
{
    pub fn new(transport: Arc<T>, handler: H, config: ConsumerConfig) -> Self {
        Self {
            transport,
            handler,
            config,
        }
    }

    /// One receive plus dispatch. Used by the loop and directly by tests.
    pub async fn poll_once(&self) -> Result<CycleReport, QueueError> {
        let batch = self.receive().await?;
        Ok(self.dispatch(batch).await)
    }

    async fn receive(&self) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.transport
            .receive_batch(&self.config.queue, &self.config.receive)
            .await
    }

    async fn dispatch(&self, batch: Vec<ReceivedMessage>) -> CycleReport {
        let mut report = CycleReport {
            received: batch.len(),
            ..CycleReport::default()
        };
        if batch.is_empty() {
            return report;
        }

        let queue = &self.config.queue;
        let to_delete: Vec<&ReceivedMessage> = match self.config.failure_scope {
            FailureScope::PerMessage => {
                let mut acked = Vec::with_capacity(batch.len());
                for message in &batch {
                    let span = message_span(queue, message);
                    match self.handler.handle(message).instrument(span.clone()).await {
                        Ok(()) => {
                            report.succeeded += 1;
                            acked.push(message);
                        }
                        Err(err) if !err.is_retryable() => {
                            span.in_scope(|| {
                                warn!(consumer = %self.config.name, error = %err, "dropping message that cannot succeed")
                            });
                            report.dropped += 1;
                            acked.push(message);
                        }
                        Err(err) => {
                            span.in_scope(|| {
                                warn!(consumer = %self.config.name, error = %err, "message left for redelivery")
                            });
                            report.retained += 1;
                        }
                    }
                }
                acked
            }
            FailureScope::WholeBatch => match process_batch(&self.handler, queue, &batch).await {
                Ok(n) => {
                    report.succeeded = n;
                    batch.iter().collect()
                }
                Err(err) => {
                    report.succeeded = err.processed;
                    let mut acked: Vec<&ReceivedMessage> = batch[..err.processed].iter().collect();
                    if err.source.is_retryable() {
                        error!(
                            consumer = %self.config.name,
                            queue = %queue,
                            message_id = %err.message_id,
                            error = %err.source,
                            batch_size = batch.len(),
                            "batch failed; leaving the rest of it for redelivery"
                        );
                    } else {
                        warn!(
                            consumer = %self.config.name,
                            queue = %queue,
                            message_id = %err.message_id,
                            error = %err.source,
                            "dropping message that cannot succeed; leaving the rest of the batch for redelivery"
                        );
                        report.dropped = 1;
                        acked.push(&batch[err.processed]);
                    }
                    report.retained = batch.len() - acked.len();
                    acked
                }
            },
        };

        for message in to_delete {
            match self.transport.delete(queue, &message.receipt).await {
                Ok(()) => report.deleted += 1,
                Err(err) => {
                    report.delete_failures += 1;
                    warn!(
                        consumer = %self.config.name,
                        queue = %queue,
                        message_id = %message.message_id,
                        error = %err,
                        "failed to delete processed message; it will be redelivered"
                    );
                }
            }
        }

        report
    }

    /// Loop until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Shutdown interrupts a pending receive or idle sleep, never a batch in
    /// progress.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.config.name.clone();
        info!(consumer = %name, queue = %self.config.queue, "queue consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.receive() => received,
            };

            let idle = match received {
                Ok(batch) if batch.is_empty() => true,
                Ok(batch) => {
                    let report = self.dispatch(batch).await;
                    debug!(consumer = %name, ?report, "batch processed");
                    false
                }
                Err(err) => {
                    warn!(consumer = %name, queue = %self.config.queue, error = %err, "receive failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(consumer = %name, "queue consumer stopped");
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self) -> ConsumerHandle
    where
        T: Send + Sync,
        H: Send + Sync,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let name = self.config.name.clone();
        let join = tokio::spawn(self.run(shutdown_rx));

        ConsumerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use jobping_queue::InMemoryQueue;

    use super::*;

    #[derive(Debug, Error)]
    enum FakeError {
        #[error("try again")]
        Transient,
        #[error("never works")]
        Permanent,
    }

    impl Retryable for FakeError {
        fn is_retryable(&self) -> bool {
            matches!(self, FakeError::Transient)
        }
    }

    /// Fails by body: `retry` is transient, `drop` is permanent, anything else succeeds.
    #[derive(Default)]
    struct ScriptedHandler {
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedHandler {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl MessageHandler for ScriptedHandler {
        type Error = FakeError;

        async fn handle(&self, message: &ReceivedMessage) -> Result<(), FakeError> {
            self.seen.lock().unwrap().push(message.body.clone());
            match message.body.as_str() {
                "retry" => Err(FakeError::Transient),
                "drop" => Err(FakeError::Permanent),
                _ => Ok(()),
            }
        }
    }

    fn config(scope: FailureScope) -> ConsumerConfig {
        ConsumerConfig::new("test", QueueId::new("work"))
            .with_receive_options(
                ReceiveOptions::default()
                    .with_max_messages(10)
                    .with_wait(Duration::from_millis(50))
                    .with_visibility_timeout(Duration::from_secs(30)),
            )
            .with_poll_interval(Duration::from_millis(10))
            .with_failure_scope(scope)
    }

    async fn seeded(bodies: &[&str]) -> Arc<InMemoryQueue> {
        let q = Arc::new(InMemoryQueue::new());
        for body in bodies {
            q.send(&QueueId::new("work"), body.to_string()).await.unwrap();
        }
        q
    }

    #[tokio::test(start_paused = true)]
    async fn per_message_scope_isolates_failures() {
        let q = seeded(&["ok", "retry", "drop"]).await;
        let handler = Arc::new(ScriptedHandler::default());
        let consumer = QueueConsumer::new(q.clone(), handler.clone(), config(FailureScope::PerMessage));

        let report = consumer.poll_once().await.unwrap();
        assert_eq!(
            report,
            CycleReport {
                received: 3,
                succeeded: 1,
                dropped: 1,
                retained: 1,
                deleted: 2,
                delete_failures: 0,
            }
        );
        assert_eq!(q.peek_bodies(&QueueId::new("work")), vec!["retry".to_string()]);

        // Redelivered once the visibility timeout lapses.
        tokio::time::advance(Duration::from_secs(31)).await;
        let again = consumer.poll_once().await.unwrap();
        assert_eq!(again.received, 1);
        assert_eq!(handler.seen().last().map(String::as_str), Some("retry"));
    }

    #[tokio::test(start_paused = true)]
    async fn whole_batch_scope_stops_at_a_retryable_failure() {
        let q = seeded(&["ok", "retry", "ok"]).await;
        let handler = Arc::new(ScriptedHandler::default());
        let consumer = QueueConsumer::new(q.clone(), handler.clone(), config(FailureScope::WholeBatch));

        let report = consumer.poll_once().await.unwrap();
        assert_eq!(
            report,
            CycleReport {
                received: 3,
                succeeded: 1,
                dropped: 0,
                retained: 2,
                deleted: 1,
                delete_failures: 0,
            }
        );
        assert_eq!(
            q.peek_bodies(&QueueId::new("work")),
            vec!["retry".to_string(), "ok".to_string()]
        );
        // Stops at the first failure.
        assert_eq!(handler.seen(), vec!["ok".to_string(), "retry".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn whole_batch_scope_drops_a_message_that_cannot_succeed() {
        let q = seeded(&["ok", "drop", "later"]).await;
        let handler = Arc::new(ScriptedHandler::default());
        let consumer = QueueConsumer::new(q.clone(), handler.clone(), config(FailureScope::WholeBatch));

        let report = consumer.poll_once().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.retained, 1);
        assert_eq!(report.deleted, 2);
        assert_eq!(q.peek_bodies(&QueueId::new("work")), vec!["later".to_string()]);

        // The untouched message comes back; the dropped one never does.
        tokio::time::advance(Duration::from_secs(31)).await;
        let again = consumer.poll_once().await.unwrap();
        assert_eq!(again.received, 1);
        assert_eq!(again.deleted, 1);
        assert_eq!(q.depth(&QueueId::new("work")), 0);
        assert_eq!(handler.seen().iter().filter(|b| *b == "drop").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn whole_batch_scope_deletes_everything_on_success() {
        let q = seeded(&["a", "b"]).await;
        let consumer = QueueConsumer::new(
            q.clone(),
            Arc::new(ScriptedHandler::default()),
            config(FailureScope::WholeBatch),
        );

        let report = consumer.poll_once().await.unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(q.depth(&QueueId::new("work")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn process_batch_names_the_failing_message() {
        let q = seeded(&["ok", "drop"]).await;
        let batch = q
            .receive_batch(&QueueId::new("work"), &config(FailureScope::WholeBatch).receive)
            .await
            .unwrap();

        let err = process_batch(&ScriptedHandler::default(), &QueueId::new("work"), &batch)
            .await
            .unwrap_err();
        assert_eq!(err.message_id, batch[1].message_id);
        assert_eq!(err.processed, 1);
        assert!(matches!(err.source, FakeError::Permanent));
    }

    #[tokio::test]
    async fn spawned_consumer_drains_and_shuts_down() {
        let q = seeded(&["one", "two", "three"]).await;
        let handler = Arc::new(ScriptedHandler::default());
        let handle =
            QueueConsumer::new(q.clone(), handler.clone(), config(FailureScope::PerMessage)).spawn();

        for _ in 0..200 {
            if q.depth(&QueueId::new("work")) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(q.depth(&QueueId::new("work")), 0);

        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("consumer should stop promptly");
        assert_eq!(handler.seen().len(), 3);
    }
}
