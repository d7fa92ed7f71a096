//! Read-only audit access to the event log.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use keystone_core::{CorrelationId, EventId};
use keystone_store::Storage;

use crate::app::AppState;
use crate::dto;
use crate::errors;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Decimal-string cursor, as emitted by previous pages.
    pub after_sequence: Option<String>,
    pub limit: Option<i64>,
}

/// GET /audit/events?after_sequence&limit
pub async fn list_events<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Query(query): Query<StreamQuery>,
) -> axum::response::Response {
    let after_sequence = match query.after_sequence.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<i64>() {
            Ok(cursor) => Some(cursor),
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    "after_sequence must be a decimal sequence string",
                );
            }
        },
    };

    match state.events.read_stream(after_sequence, query.limit).await {
        Ok(page) => Json(dto::event_page_json(&page)).into_response(),
        Err(err) => errors::error_response(err),
    }
}

/// GET /audit/events/:id
pub async fn get_event<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(event_id): Path<EventId>,
) -> axum::response::Response {
    match state.events.get_by_id(event_id).await {
        Ok(Some(event)) => Json(dto::event_json(&event)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "no such event"),
        Err(err) => errors::error_response(err),
    }
}

/// GET /audit/correlations/:id — all events on one correlation edge.
pub async fn by_correlation<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(correlation_id): Path<CorrelationId>,
) -> axum::response::Response {
    match state.events.get_by_correlation(correlation_id).await {
        Ok(events) => {
            Json(events.iter().map(dto::event_json).collect::<Vec<_>>()).into_response()
        }
        Err(err) => errors::error_response(err),
    }
}
