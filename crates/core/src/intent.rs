//! Intents: declarative, pre-validation requests to change state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::actor::Actor;
use crate::event::{Event, RuleTrace};
use crate::id::{CorrelationId, EntityId, EventId, IntentId};

/// A client-submitted request. May be rejected, approved, or routed — none of
/// which are errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_type: String,
    pub actor: Actor,
    pub data: JsonValue,
    /// Target entity for update-type intents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    /// OCC baseline for update-type intents; defaults to the current version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_entity_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
}

/// Status of a stored intent awaiting out-of-band action.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    PendingApproval,
}

/// Pipeline output. `success: false` with `error` set is a terminal business
/// outcome (rejection), not a failure of the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub success: bool,
    pub intent_id: IntentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IntentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_approver_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces: Option<Vec<RuleTrace>>,
}

impl IntentResult {
    /// A committed turn (or an idempotent replay of one).
    pub fn committed(intent_id: IntentId, event: Event) -> Self {
        Self {
            success: true,
            intent_id,
            event_id: Some(event.id),
            event: Some(event),
            error: None,
            status: None,
            required_approver_role: None,
            traces: None,
        }
    }

    /// A rule-driven rejection: terminal, successful pipeline result.
    pub fn rejected(intent_id: IntentId, message: impl Into<String>, traces: Vec<RuleTrace>) -> Self {
        Self {
            success: false,
            intent_id,
            event_id: None,
            event: None,
            error: Some(message.into()),
            status: None,
            required_approver_role: None,
            traces: Some(traces),
        }
    }

    /// Routed for approval: the intent is persisted, no event committed.
    pub fn routed(intent_id: IntentId, approver_role: impl Into<String>, traces: Vec<RuleTrace>) -> Self {
        Self {
            success: false,
            intent_id,
            event_id: None,
            event: None,
            error: None,
            status: Some(IntentStatus::PendingApproval),
            required_approver_role: Some(approver_role.into()),
            traces: Some(traces),
        }
    }

    /// Terminal failure surfaced as a result per the pipeline contract
    /// (e.g. no handler registered for the intent type).
    pub fn failed(intent_id: IntentId, message: impl Into<String>) -> Self {
        Self {
            success: false,
            intent_id,
            event_id: None,
            event: None,
            error: Some(message.into()),
            status: None,
            required_approver_role: None,
            traces: None,
        }
    }
}

/// Persisted form of an intent that was routed for approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredIntent {
    pub intent_id: IntentId,
    pub intent_type: String,
    /// The full submitted intent, replayable on approval.
    pub intent: Intent,
    pub status: IntentStatus,
    pub required_approver_role: Option<String>,
    pub submitted_at: DateTime<Utc>,
}
