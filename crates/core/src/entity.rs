//! Current-state entity rows, derived from the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::EntityId;
use crate::scope::LegalEntity;

/// A versioned row in the entity graph.
///
/// The row is a cache of current state; the event log is the source of truth.
/// `version` starts at 1 and increments by exactly one per committed update,
/// so it always equals the number of events with this entity as subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub entity_id: EntityId,
    pub legal_entity: LegalEntity,
    /// Opaque key→value attributes; structure is the handlers' concern.
    pub attributes: JsonValue,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Read one attribute by dot-path (e.g. `"address.city"`).
    pub fn attribute(&self, path: &str) -> Option<&JsonValue> {
        let mut current = &self.attributes;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }
}
