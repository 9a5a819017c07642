use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobping_core::{AnalysisSource, Job, Notification};
use jobping_queue::{ReceiptHandle, ReceivedMessage};

// -------------------------
// Request DTOs
// -------------------------

/// A batch of queue records pushed by the hosting queue service.
#[derive(Debug, Deserialize)]
pub struct InvocationEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<InvocationRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRecord {
    pub message_id: String,
    #[serde(default)]
    pub receipt_handle: String,
    pub body: String,
    #[serde(default)]
    pub attributes: RecordAttributes,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordAttributes {
    #[serde(rename = "ApproximateReceiveCount")]
    pub approximate_receive_count: Option<String>,
}

impl From<InvocationRecord> for ReceivedMessage {
    fn from(record: InvocationRecord) -> Self {
        let receive_count = record
            .attributes
            .approximate_receive_count
            .and_then(|c| c.parse().ok())
            .unwrap_or(1);
        ReceivedMessage {
            receipt: ReceiptHandle::new(record.receipt_handle),
            message_id: record.message_id,
            body: record.body,
            receive_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub title: String,
    pub company: String,
    pub description: String,
    pub url: String,
    pub location: Option<String>,
    pub job_type: Option<String>,
    #[serde(default)]
    pub is_remote: bool,
    pub min_salary: Option<f64>,
    pub max_salary: Option<f64>,
    pub date_posted: Option<DateTime<Utc>>,
}

impl CreateJobRequest {
    pub fn into_job(self) -> Job {
        let mut job = Job::new(self.title, self.company, self.description, self.url)
            .with_remote(self.is_remote)
            .with_salary(self.min_salary, self.max_salary);
        if let Some(location) = self.location {
            job = job.with_location(location);
        }
        job.job_type = self.job_type;
        job.posted_at = self.date_posted;
        job
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct InvocationResponse {
    pub stage: &'static str,
    pub processed: usize,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: String,
    pub message_id: String,
}

#[derive(Debug, Serialize)]
pub struct NotificationView {
    pub id: String,
    pub user_id: String,
    pub job_id: String,
    pub job_title: String,
    pub company: String,
    pub job_url: String,
    pub score: u8,
    pub explanation: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    pub placeholder: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationView {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id.to_string(),
            user_id: n.user_id.to_string(),
            job_id: n.job_id.to_string(),
            job_title: n.job_title,
            company: n.employer,
            job_url: n.job_url,
            score: n.score.value(),
            placeholder: n.analysis.source == AnalysisSource::Placeholder,
            explanation: n.analysis.explanation,
            pros: n.analysis.pros,
            cons: n.analysis.cons,
            created_at: n.created_at,
        }
    }
}
