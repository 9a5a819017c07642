use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};

use jobping_core::UserId;
use jobping_infra::store::NotificationRepository;

use crate::app::dto::{NotificationView, NotificationsQuery};
use crate::app::errors::{json_error, store_error_to_response};
use crate::app::services::AppServices;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

/// Notification history, newest first.
pub async fn list_notifications(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<NotificationsQuery>,
) -> axum::response::Response {
    let user_id = match query.user_id.as_deref().map(str::parse::<UserId>).transpose() {
        Ok(id) => id,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, "invalid_user_id", err.to_string()),
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match services
        .pipeline
        .store()
        .list_notifications(user_id, limit)
        .await
    {
        Ok(items) => {
            let items: Vec<NotificationView> = items.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(items)).into_response()
        }
        Err(err) => store_error_to_response(err),
    }
}
