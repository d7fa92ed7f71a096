//! `POST /intents` — the write path.

use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use keystone_core::{CorrelationId, EntityId, Intent};
use keystone_store::Storage;

use crate::app::AppState;
use crate::context::ActorContext;
use crate::dto;
use crate::errors;

#[derive(Debug, Deserialize)]
pub struct IntentRequest {
    pub intent_type: String,
    #[serde(default)]
    pub data: JsonValue,
    pub entity_id: Option<EntityId>,
    pub expected_entity_version: Option<i64>,
    pub idempotency_key: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub effective_date: Option<NaiveDate>,
}

/// Submit one intent; rejections and approval routing come back as 200 with
/// `success: false`. Only platform failures map to error status codes.
pub async fn submit<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<IntentRequest>,
) -> axum::response::Response {
    let intent = Intent {
        intent_type: body.intent_type,
        actor: actor.into_actor(),
        data: body.data,
        entity_id: body.entity_id,
        expected_entity_version: body.expected_entity_version,
        idempotency_key: body.idempotency_key,
        correlation_id: body.correlation_id,
        occurred_at: body.occurred_at,
        effective_date: body.effective_date,
    };

    match state.pipeline.execute(intent).await {
        Ok(result) => Json(dto::intent_result_json(&result)).into_response(),
        Err(err) => errors::error_response(err),
    }
}
