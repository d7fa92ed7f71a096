//! Projection reads, rebuilds, snapshots and dead letters.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use keystone_core::SnapshotId;
use keystone_store::Storage;

use crate::app::AppState;
use crate::dto;
use crate::errors;

fn unknown_projection(projection_type: &str) -> axum::response::Response {
    errors::json_error(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("unknown projection type '{projection_type}'"),
    )
}

/// GET /projections/:type — the live rows.
pub async fn rows<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(projection_type): Path<String>,
) -> axum::response::Response {
    let Some(table) = state.projections.table(&projection_type) else {
        return unknown_projection(&projection_type);
    };

    match state.storage.projection_rows(None, &table.table_name).await {
        Ok(rows) => Json(json!({ "projection_type": projection_type, "rows": rows })).into_response(),
        Err(err) => errors::error_response(err),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RebuildRequest {
    pub batch_size: Option<usize>,
}

/// POST /projections/:type/rebuild — synchronous replay from the log.
pub async fn rebuild<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(projection_type): Path<String>,
    body: Option<Json<RebuildRequest>>,
) -> axum::response::Response {
    let batch_size = body.and_then(|Json(b)| b.batch_size);
    match state.projections.rebuild(&projection_type, batch_size).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => errors::error_response(err),
    }
}

/// POST /projections/:type/snapshot
pub async fn create_snapshot<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(projection_type): Path<String>,
) -> axum::response::Response {
    match state.snapshots.create_snapshot(&projection_type).await {
        Ok(snapshot) => Json(dto::snapshot_json(&snapshot)).into_response(),
        Err(err) => errors::error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub snapshot_id: SnapshotId,
}

/// POST /projections/:type/snapshot/restore
pub async fn restore_snapshot<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(projection_type): Path<String>,
    Json(body): Json<RestoreRequest>,
) -> axum::response::Response {
    match state
        .snapshots
        .restore_from_snapshot(&projection_type, body.snapshot_id)
        .await
    {
        Ok(()) => Json(json!({ "restored": body.snapshot_id })).into_response(),
        Err(err) => errors::error_response(err),
    }
}

/// GET /projections/:type/snapshots
pub async fn list_snapshots<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(projection_type): Path<String>,
) -> axum::response::Response {
    match state.snapshots.list_snapshots(&projection_type).await {
        Ok(snapshots) => {
            Json(snapshots.iter().map(dto::snapshot_json).collect::<Vec<_>>()).into_response()
        }
        Err(err) => errors::error_response(err),
    }
}

/// GET /projections/:type/dead-letters
pub async fn dead_letters<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(projection_type): Path<String>,
) -> axum::response::Response {
    match state.projections.dead_letters(&projection_type).await {
        Ok(entries) => {
            Json(entries.iter().map(dto::dead_letter_json).collect::<Vec<_>>()).into_response()
        }
        Err(err) => errors::error_response(err),
    }
}
