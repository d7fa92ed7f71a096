//! Storage-level record shapes shared by the backends and services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use keystone_core::{Event, EventId, LegalEntity, SnapshotId};

/// A registered event type: `(type_name, schema_version)` → JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredEventType {
    pub type_name: String,
    pub schema_version: i32,
    pub json_schema: JsonValue,
    pub description: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// One page of the global event log, ascending by sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub has_more: bool,
    /// Cursor for the next page: the last sequence in `events`, if any.
    pub next_sequence: Option<i64>,
}

/// A row in a projection table. The `data` shape is the handler's concern;
/// `last_event_id` makes the upsert idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRow {
    pub pk: String,
    pub legal_entity: LegalEntity,
    pub last_event_id: EventId,
    pub data: JsonValue,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time capture of a projection table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: SnapshotId,
    pub projection_type: String,
    /// Highest event sequence applied when the snapshot was taken.
    pub sequence_number: i64,
    /// True iff a newer snapshot of the same projection type exists.
    /// Derived on read, never persisted.
    pub is_stale: bool,
    pub created_at: DateTime<Utc>,
    /// The captured rows.
    pub blob: Vec<ProjectionRow>,
}

/// Record of an event a projection handler failed to apply during rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub projection_type: String,
    pub event_id: EventId,
    pub event_sequence: i64,
    pub event_type: String,
    pub failed_at: DateTime<Utc>,
    pub error_message: String,
}

/// Resume cursor for an external consumer. The platform does not deliver
/// events; it only keeps the cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber_id: String,
    pub event_types: Vec<String>,
    pub last_processed_seq: i64,
    pub updated_at: DateTime<Utc>,
}
