//! Wire shapes.
//!
//! 64-bit sequences are emitted as decimal strings — JSON number precision
//! is insufficient past 2^53. Timestamps serialize as ISO-8601 UTC via
//! chrono.

use serde_json::{json, Value as JsonValue};

use keystone_core::{Event, IntentResult};
use keystone_store::{DeadLetter, EventPage, Snapshot};

pub fn event_json(event: &Event) -> JsonValue {
    json!({
        "id": event.id,
        "sequence": event.sequence.to_string(),
        "type": event.event_type,
        "schema_version": event.schema_version,
        "occurred_at": event.occurred_at,
        "recorded_at": event.recorded_at,
        "effective_date": event.effective_date,
        "scope": event.scope,
        "actor": event.actor,
        "intent_id": event.intent_id,
        "correlation_id": event.correlation_id,
        "caused_by": event.caused_by,
        "data": event.data,
        "entities": event.entities,
        "rules_evaluated": event.rules_evaluated,
        "idempotency_key": event.idempotency_key,
    })
}

pub fn event_page_json(page: &EventPage) -> JsonValue {
    json!({
        "events": page.events.iter().map(event_json).collect::<Vec<_>>(),
        "has_more": page.has_more,
        "next_sequence": page.next_sequence.map(|s| s.to_string()),
    })
}

pub fn intent_result_json(result: &IntentResult) -> JsonValue {
    json!({
        "success": result.success,
        "intent_id": result.intent_id,
        "event_id": result.event_id,
        "event": result.event.as_ref().map(event_json),
        "error": result.error,
        "status": result.status,
        "required_approver_role": result.required_approver_role,
        "traces": result.traces,
    })
}

/// Snapshot metadata; the captured rows are summarized, not inlined.
pub fn snapshot_json(snapshot: &Snapshot) -> JsonValue {
    json!({
        "snapshot_id": snapshot.snapshot_id,
        "projection_type": snapshot.projection_type,
        "sequence_number": snapshot.sequence_number.to_string(),
        "is_stale": snapshot.is_stale,
        "created_at": snapshot.created_at,
        "row_count": snapshot.blob.len(),
    })
}

pub fn dead_letter_json(entry: &DeadLetter) -> JsonValue {
    json!({
        "projection_type": entry.projection_type,
        "event_id": entry.event_id,
        "event_sequence": entry.event_sequence.to_string(),
        "event_type": entry.event_type,
        "failed_at": entry.failed_at,
        "error_message": entry.error_message,
    })
}
