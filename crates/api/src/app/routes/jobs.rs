use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};

use jobping_infra::store::JobRepository;
use jobping_pipeline::Stage;
use jobping_queue::{JobMessage, MessageBody, QueueTransport};

use crate::app::dto::{CreateJobRequest, JobAccepted};
use crate::app::errors::{json_error, queue_error_to_response, store_error_to_response};
use crate::app::services::AppServices;

/// Ingestion hook: store a pending job and queue it for enrichment.
pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<CreateJobRequest>,
) -> axum::response::Response {
    if body.title.trim().is_empty() || body.company.trim().is_empty() || body.url.trim().is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "title, company and url are required",
        );
    }

    let job = body.into_job();
    let pipeline = &services.pipeline;

    if let Err(err) = pipeline.store().insert_job(&job).await {
        return store_error_to_response(err);
    }

    let message = match (JobMessage { job_id: job.id }).encode() {
        Ok(message) => message,
        Err(err) => return queue_error_to_response(err),
    };
    match pipeline
        .queue()
        .send(pipeline.inbound_queue(Stage::Enrichment), message)
        .await
    {
        Ok(message_id) => (
            StatusCode::ACCEPTED,
            Json(JobAccepted {
                job_id: job.id.to_string(),
                message_id,
            }),
        )
            .into_response(),
        Err(err) => queue_error_to_response(err),
    }
}
