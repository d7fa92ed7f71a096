//! Subscription cursors for external consumers.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use keystone_store::Storage;

use crate::app::AppState;
use crate::errors;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub subscriber_id: String,
    #[serde(default)]
    pub event_types: Vec<String>,
}

/// POST /subscriptions
pub async fn register<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Json(body): Json<RegisterRequest>,
) -> axum::response::Response {
    match state
        .subscriptions
        .register(&body.subscriber_id, body.event_types)
        .await
    {
        Ok(subscription) => (StatusCode::CREATED, Json(subscription)).into_response(),
        Err(err) => errors::error_response(err),
    }
}

/// GET /subscriptions/:id
pub async fn get<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(subscriber_id): Path<String>,
) -> axum::response::Response {
    match state.subscriptions.get(&subscriber_id).await {
        Ok(Some(subscription)) => Json(subscription).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "no such subscription"),
        Err(err) => errors::error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    /// Decimal sequence string, as read from the audit stream.
    pub sequence: String,
}

/// POST /subscriptions/:id/ack — advance the resume cursor.
pub async fn ack<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(subscriber_id): Path<String>,
    Json(body): Json<AckRequest>,
) -> axum::response::Response {
    let Ok(sequence) = body.sequence.parse::<i64>() else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "sequence must be a decimal sequence string",
        );
    };

    match state.subscriptions.advance(&subscriber_id, sequence).await {
        Ok(subscription) => Json(subscription).into_response(),
        Err(err) => errors::error_response(err),
    }
}
