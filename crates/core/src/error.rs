//! Platform error taxonomy.
//!
//! The core raises these; the HTTP layer maps each kind to a status code.
//! Rule-driven rejections are *not* errors and never appear here — they are
//! successful pipeline results carrying `success: false`.

use thiserror::Error;

use crate::id::EventId;

/// Result type used across the platform.
pub type MdmResult<T> = Result<T, MdmError>;

/// Typed failure kinds raised by the core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MdmError {
    /// Payload or schema validation failure.
    #[error("validation failed: {message}")]
    Validation {
        field: Option<String>,
        message: String,
        /// Per-path errors from schema validation, empty otherwise.
        details: Vec<String>,
    },

    /// Missing or invalid authentication.
    #[error("authentication required")]
    Authentication,

    /// The actor lacks a required capability.
    #[error("missing capability: {required}")]
    Authorization { required: String },

    /// Entity absent, or present under a different legal-entity scope.
    #[error("entity {entity_type}/{entity_id} not found")]
    EntityNotFound {
        entity_type: String,
        entity_id: String,
    },

    /// Optimistic concurrency mismatch on an entity version.
    #[error("version conflict on {entity_id}: expected {expected}, actual {actual}")]
    ConcurrencyConflict {
        entity_id: String,
        expected: i64,
        actual: i64,
    },

    /// Idempotency-key reuse that is not a clean replay.
    #[error("idempotency key {key:?} already bound to event {existing_event_id}")]
    IdempotencyConflict {
        key: String,
        existing_event_id: EventId,
    },

    /// Lower-level storage failure.
    #[error("storage failure ({code}): {message}")]
    Storage { code: String, message: String },
}

impl MdmError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            field: None,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.into()),
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn schema(message: impl Into<String>, details: Vec<String>) -> Self {
        Self::Validation {
            field: None,
            message: message.into(),
            details,
        }
    }

    pub fn authorization(required: impl Into<String>) -> Self {
        Self::Authorization {
            required: required.into(),
        }
    }

    pub fn not_found(entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        Self::EntityNotFound {
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
        }
    }

    pub fn conflict(entity_id: impl ToString, expected: i64, actual: i64) -> Self {
        Self::ConcurrencyConflict {
            entity_id: entity_id.to_string(),
            expected,
            actual,
        }
    }

    pub fn storage(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            code: code.into(),
            message: message.into(),
        }
    }
}
