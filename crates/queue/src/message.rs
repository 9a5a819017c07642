//! Message bodies exchanged between stages.
//!
//! Bodies are JSON objects carrying identifiers only; every stage reloads the
//! records it needs from storage.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use jobping_core::{JobId, UserId};

use crate::transport::QueueError;

/// Body consumed by Enrichment and Fan-Out: `{"job_id": "<uuid>"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
}

/// Body consumed by Scoring and Notification:
/// `{"job_id": "<uuid>", "user_id": "<uuid>"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUserMessage {
    pub job_id: JobId,
    pub user_id: UserId,
}

/// A body that could not be decoded. Redelivery will never fix it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed message body: {reason}")]
pub struct MalformedMessage {
    pub reason: String,
}

pub trait MessageBody: Serialize + DeserializeOwned + Sized {
    fn encode(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Encode(e.to_string()))
    }

    fn decode(body: &str) -> Result<Self, MalformedMessage> {
        if body.trim().is_empty() {
            return Err(MalformedMessage {
                reason: "empty body".to_string(),
            });
        }
        serde_json::from_str(body).map_err(|e| MalformedMessage {
            reason: e.to_string(),
        })
    }
}

impl MessageBody for JobMessage {}
impl MessageBody for JobUserMessage {}
