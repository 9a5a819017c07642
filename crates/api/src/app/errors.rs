use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use jobping_infra::store::StoreError;
use jobping_infra::workers::BatchError;
use jobping_pipeline::StageError;
use jobping_queue::QueueError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::Corrupt(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "corrupt_record", msg),
        other => json_error(StatusCode::SERVICE_UNAVAILABLE, "store_error", other.to_string()),
    }
}

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    json_error(StatusCode::BAD_GATEWAY, "queue_error", err.to_string())
}

/// The host treats any non-2xx answer as "redeliver the whole batch".
pub fn batch_error_to_response(err: BatchError<StageError>) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(json!({
            "error": "batch_failed",
            "message": err.to_string(),
            "failed_message_id": err.message_id,
            "processed": err.processed,
        })),
    )
        .into_response()
}
