use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use jobping_pipeline::Stage;
use jobping_queue::ReceivedMessage;

use crate::app::dto::{InvocationEvent, InvocationResponse};
use crate::app::errors::{batch_error_to_response, json_error};
use crate::app::services::AppServices;

/// Run one host-delivered batch through a stage.
///
/// 200 means the host may delete every record; anything else means the whole
/// batch should be redelivered.
pub async fn invoke(
    Extension(services): Extension<Arc<AppServices>>,
    Path(stage): Path<String>,
    Json(event): Json<InvocationEvent>,
) -> axum::response::Response {
    let stage: Stage = match stage.parse() {
        Ok(stage) => stage,
        Err(err) => return json_error(StatusCode::NOT_FOUND, "unknown_stage", err.to_string()),
    };

    let batch: Vec<ReceivedMessage> = event.records.into_iter().map(Into::into).collect();
    info!(stage = stage.name(), records = batch.len(), "batch invoked");

    match services.pipeline.invoke_batch(stage, &batch).await {
        Ok(processed) => (
            StatusCode::OK,
            Json(InvocationResponse {
                stage: stage.name(),
                processed,
            }),
        )
            .into_response(),
        Err(err) => batch_error_to_response(err),
    }
}
