use axum::{
    Router,
    routing::{get, post},
};

pub mod invocations;
pub mod jobs;
pub mod notifications;
pub mod system;

/// Router for every endpoint that needs the pipeline.
pub fn router() -> Router {
    Router::new()
        .route("/invocations/:stage", post(invocations::invoke))
        .route("/jobs", post(jobs::create_job))
        .route("/notifications", get(notifications::list_notifications))
}
