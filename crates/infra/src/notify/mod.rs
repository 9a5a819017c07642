//! Delivery of match notifications to a user's external destination.

mod webhook;

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

use jobping_core::Notification;

pub use webhook::{WebhookSink, format_message};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The destination rejected the message; resending will not help.
    #[error("delivery rejected: {0}")]
    Permanent(String),

    #[error("delivery failed: {0}")]
    Transient(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

/// Sends one notification to `address` (e.g. a webhook URL).
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, address: &str, notification: &Notification) -> Result<(), SinkError>;
}

#[async_trait::async_trait]
impl<T> NotificationSink for Arc<T>
where
    T: NotificationSink + ?Sized,
{
    async fn deliver(&self, address: &str, notification: &Notification) -> Result<(), SinkError> {
        (**self).deliver(address, notification).await
    }
}

/// Logs instead of sending. The default when no outbound delivery is wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, address: &str, notification: &Notification) -> Result<(), SinkError> {
        let (title, _) = format_message(notification);
        info!(
            user_id = %notification.user_id,
            job_id = %notification.job_id,
            score = notification.score.value(),
            address_len = address.len(),
            %title,
            "notification delivered to log"
        );
        Ok(())
    }
}

/// Keeps every delivery in memory; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(String, Notification)>>,
    failure: Mutex<Option<SinkError>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later delivery fails with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<SinkError>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = error;
        }
    }

    pub fn delivered(&self) -> Vec<(String, Notification)> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, address: &str, notification: &Notification) -> Result<(), SinkError> {
        let failure = self
            .failure
            .lock()
            .map_err(|_| SinkError::Transient("recording sink poisoned".to_string()))?
            .clone();
        if let Some(err) = failure {
            return Err(err);
        }

        self.delivered
            .lock()
            .map_err(|_| SinkError::Transient("recording sink poisoned".to_string()))?
            .push((address.to_string(), notification.clone()));
        Ok(())
    }
}
