//! Queue transport abstraction (mechanics only).
//!
//! Stages talk to each other exclusively through named point-to-point queues.
//! This module defines the contract every transport must honour; it says
//! nothing about what the messages mean.
//!
//! ## Delivery model
//!
//! - **At-least-once**: a received message stays in the queue until it is
//!   explicitly deleted with the receipt handle from that receive.
//! - **Visibility timeout**: a received message is hidden from other
//!   receivers for the visibility timeout. If it is not deleted in that
//!   window it becomes visible again and is redelivered.
//! - **Long polling**: a receive waits up to the wait window for at least one
//!   message before returning an empty batch.
//! - **No ordering guarantees** across messages.
//!
//! Consumers must be idempotent: processing the same message twice must
//! converge to the same stored state.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of a queue (e.g. `user-analysis-queue`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for QueueId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque token identifying one particular receive of a message.
///
/// Only the handle from the most recent receive is guaranteed to delete the
/// message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message handed to a consumer by `receive_batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt: ReceiptHandle,
    pub body: String,
    /// How many times this message has been received, including this one.
    pub receive_count: u32,
}

/// Parameters of a single receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub max_messages: usize,
    pub wait: Duration,
    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(60),
        }
    }
}

impl ReceiveOptions {
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    /// The receipt handle does not match any in-flight receive.
    #[error("unknown receipt handle: {0}")]
    UnknownReceipt(String),

    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("message encoding error: {0}")]
    Encode(String),

    /// Internal lock poisoning (in-memory transport).
    #[error("queue state poisoned")]
    Poisoned,
}

impl QueueError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, QueueError::UnknownReceipt(_) | QueueError::Encode(_))
    }
}

/// Point-to-point queue transport.
///
/// `send` enqueues a body and returns the transport's message id.
/// `receive_batch` long-polls for up to `options.max_messages` visible
/// messages. `delete` acknowledges a message using the receipt handle from its
/// latest receive.
#[async_trait::async_trait]
pub trait QueueTransport: Send + Sync {
    async fn send(&self, queue: &QueueId, body: String) -> Result<String, QueueError>;

    async fn receive_batch(
        &self,
        queue: &QueueId,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    async fn delete(&self, queue: &QueueId, receipt: &ReceiptHandle) -> Result<(), QueueError>;
}

#[async_trait::async_trait]
impl<T> QueueTransport for Arc<T>
where
    T: QueueTransport + ?Sized,
{
    async fn send(&self, queue: &QueueId, body: String) -> Result<String, QueueError> {
        (**self).send(queue, body).await
    }

    async fn receive_batch(
        &self,
        queue: &QueueId,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        (**self).receive_batch(queue, options).await
    }

    async fn delete(&self, queue: &QueueId, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        (**self).delete(queue, receipt).await
    }
}
