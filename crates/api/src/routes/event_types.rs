//! Event-type registry endpoints.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use keystone_store::Storage;

use crate::app::AppState;
use crate::errors;

/// GET /event-types — distinct registered type names.
pub async fn list<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
) -> axum::response::Response {
    match state.registry.list_types().await {
        Ok(types) => Json(json!({ "types": types })).into_response(),
        Err(err) => errors::error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub type_name: String,
    pub schema_version: i32,
    pub json_schema: JsonValue,
    pub description: Option<String>,
}

/// POST /event-types — upsert a schema for `(type_name, schema_version)`.
pub async fn register<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Json(body): Json<RegisterRequest>,
) -> axum::response::Response {
    match state
        .registry
        .register(&body.type_name, body.schema_version, body.json_schema, body.description)
        .await
    {
        Ok(registered) => (StatusCode::CREATED, Json(registered)).into_response(),
        Err(err) => errors::error_response(err),
    }
}

/// GET /event-types/:name — all registered versions of one type.
pub async fn versions<S: Storage>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(type_name): Path<String>,
) -> axum::response::Response {
    match state.registry.list_versions(&type_name).await {
        Ok(versions) if versions.is_empty() => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no schemas registered for '{type_name}'"),
        ),
        Ok(versions) => Json(versions).into_response(),
        Err(err) => errors::error_response(err),
    }
}
