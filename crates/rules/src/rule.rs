//! Rule and condition shapes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Evaluation phase. Phases run in declaration order: validate, enrich,
/// decide.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePhase {
    Validate,
    Enrich,
    Decide,
}

/// What a firing rule does to the evaluation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Approve,
    Reject,
    RouteForApproval,
    Enrich,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Approve => "approve",
            RuleAction::Reject => "reject",
            RuleAction::RouteForApproval => "route_for_approval",
            RuleAction::Enrich => "enrich",
        }
    }
}

/// Comparison applied to one context field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Neq,
    NotEmpty,
    In,
    NotIn,
    Exists,
    Gt,
    Lt,
    Gte,
    Lte,
    /// Regex match on a string field.
    Matches,
}

/// One predicate over the evaluation context.
///
/// `field` is a dot-path into the context (e.g. `"data.sku"`); derived flags
/// computed by the pipeline live alongside intent data (e.g.
/// `"_sku_duplicate_exists"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

/// A declarative rule. Smaller `priority` evaluates earlier; ties keep
/// source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub intent_type: String,
    pub phase: RulePhase,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrich_fields: Option<Map<String, JsonValue>>,
}

impl Rule {
    /// Whether the rule is in effect on `today`. Unbounded ends are open.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        if let Some(from) = self.effective_from {
            if today < from {
                return false;
            }
        }
        if let Some(to) = self.effective_to {
            if today > to {
                return false;
            }
        }
        true
    }
}
