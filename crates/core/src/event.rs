//! Event model: the immutable, committed record of a state change.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::actor::Actor;
use crate::id::{CorrelationId, EntityId, EventId, IntentId};
use crate::scope::Scope;

/// Role an entity plays on an event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRole {
    /// The entity this event mutates; its version counter advances.
    Subject,
    Object,
    Context,
}

/// Reference from an event to an entity in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: EntityId,
    pub role: EntityRole,
}

impl EntityRef {
    pub fn subject(entity_type: impl Into<String>, entity_id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            role: EntityRole::Subject,
        }
    }
}

/// Outcome of evaluating one rule, persisted on the emitting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTrace {
    pub rule_id: String,
    pub rule_name: String,
    pub result: TraceResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions_taken: Option<String>,
    pub evaluation_ms: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceResult {
    Fired,
    NotApplicable,
    ConditionFalse,
    SkippedInactive,
}

/// A committed event. Never updated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Global monotonic position in the log. Assigned at commit; gaps are an
    /// ordering artifact, not missing data.
    pub sequence: i64,
    pub event_type: String,
    pub schema_version: i32,
    /// Domain time: when the change happened in the business.
    pub occurred_at: DateTime<Utc>,
    /// System time: when the platform persisted the event.
    pub recorded_at: DateTime<Utc>,
    /// Accounting time, when distinct from `occurred_at`.
    pub effective_date: Option<NaiveDate>,
    pub scope: Scope,
    pub actor: Actor,
    pub intent_id: Option<IntentId>,
    pub correlation_id: Option<CorrelationId>,
    pub caused_by: Option<EventId>,
    pub data: JsonValue,
    pub entities: Vec<EntityRef>,
    pub rules_evaluated: Vec<RuleTrace>,
    pub idempotency_key: Option<String>,
}

impl Event {
    /// The entity this event mutates, if any.
    pub fn subject(&self) -> Option<&EntityRef> {
        self.entities.iter().find(|r| r.role == EntityRole::Subject)
    }
}

/// Input to `EventStore::append`: an event minus what the store assigns
/// (`id`, `sequence`, `recorded_at`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEvent {
    pub event_type: String,
    pub schema_version: i32,
    pub occurred_at: DateTime<Utc>,
    pub effective_date: Option<NaiveDate>,
    pub scope: Scope,
    pub actor: Actor,
    pub intent_id: Option<IntentId>,
    pub correlation_id: Option<CorrelationId>,
    pub caused_by: Option<EventId>,
    pub data: JsonValue,
    pub entities: Vec<EntityRef>,
    pub rules_evaluated: Vec<RuleTrace>,
    pub idempotency_key: Option<String>,
    /// When set, append fails unless the subject entity is at exactly this
    /// version under the same unit of work.
    pub expected_entity_version: Option<i64>,
}

impl AppendEvent {
    pub fn subject(&self) -> Option<&EntityRef> {
        self.entities.iter().find(|r| r.role == EntityRole::Subject)
    }
}
