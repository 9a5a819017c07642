use thiserror::Error;

use jobping_ai::AiError;
use jobping_infra::notify::SinkError;
use jobping_infra::store::StoreError;
use jobping_infra::workers::Retryable;
use jobping_queue::{MalformedMessage, QueueError};

/// Why a stage failed to process a message.
///
/// Missing records are not errors; stages report them as
/// `StageOutcome::Dropped`.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Malformed(#[from] MalformedMessage),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("oracle: {0}")]
    Oracle(#[from] AiError),

    #[error("queue: {0}")]
    Queue(#[from] QueueError),

    #[error("notification delivery: {0}")]
    Delivery(#[from] SinkError),
}

impl Retryable for StageError {
    fn is_retryable(&self) -> bool {
        match self {
            StageError::Malformed(_) => false,
            StageError::Store(e) => e.is_retryable(),
            StageError::Oracle(e) => e.is_retryable(),
            StageError::Queue(e) => e.is_retryable(),
            StageError::Delivery(e) => e.is_retryable(),
        }
    }
}
