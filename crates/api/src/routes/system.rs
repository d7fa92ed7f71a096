//! Health reporting.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use keystone_store::Storage;

use crate::app::AppState;

const DB_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// GET /health — `ok`, or `degraded` when the database check fails or takes
/// longer than 3 seconds.
pub async fn health<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
) -> axum::response::Response {
    let database = tokio::time::timeout(DB_CHECK_TIMEOUT, state.storage.ping()).await;
    match database {
        Ok(Ok(())) => Json(json!({ "status": "ok", "database": "ok" })).into_response(),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": "unreachable" })),
        )
            .into_response(),
    }
}
