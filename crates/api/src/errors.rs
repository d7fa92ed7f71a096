//! Mapping from the platform error taxonomy onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use keystone_core::MdmError;

/// One error kind, one status. Rule-driven rejections never reach this —
/// they are successful pipeline results.
pub fn error_response(err: MdmError) -> axum::response::Response {
    match err {
        MdmError::Validation {
            field,
            message,
            details,
        } => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({
                "error": "validation_error",
                "message": message,
                "field": field,
                "details": details,
            })),
        )
            .into_response(),
        MdmError::Authentication => {
            json_error(StatusCode::UNAUTHORIZED, "authentication_error", "authentication required")
        }
        MdmError::Authorization { required } => (
            StatusCode::FORBIDDEN,
            axum::Json(json!({
                "error": "authorization_error",
                "message": format!("missing capability: {required}"),
                "required_capabilities": [required],
            })),
        )
            .into_response(),
        MdmError::EntityNotFound { entity_type, entity_id } => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("entity {entity_type}/{entity_id} not found"),
        ),
        MdmError::ConcurrencyConflict { entity_id, expected, actual } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "concurrency_conflict",
                "message": format!("version conflict on {entity_id}"),
                "expected": expected,
                "actual": actual,
            })),
        )
            .into_response(),
        MdmError::IdempotencyConflict { key, existing_event_id } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "idempotency_conflict",
                "message": format!("idempotency key {key:?} is already in use"),
                "existing_event_id": existing_event_id,
            })),
        )
            .into_response(),
        MdmError::Storage { code, message } => {
            tracing::error!(code, message, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "event_store_error", "internal storage failure")
        }
    }
}

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
