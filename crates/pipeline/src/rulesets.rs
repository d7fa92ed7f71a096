//! Rule sets per intent type.
//!
//! Rules are data. The built-in master-data set covers vendor and item
//! lifecycles; deployments extend or replace it from JSON configuration.

use std::collections::HashMap;

use serde_json::{json, Value as JsonValue};

use keystone_core::{MdmError, MdmResult};
use keystone_rules::{Condition, ConditionOperator, Rule, RuleAction, RulePhase};

/// Process-wide ruleset registry, populated at startup.
#[derive(Debug, Default)]
pub struct RulesetRegistry {
    by_intent_type: HashMap<String, Vec<Rule>>,
}

impl RulesetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in master-data rule set.
    pub fn master_data_defaults() -> Self {
        let mut registry = Self::new();
        for rule in default_rules() {
            registry.add(rule);
        }
        registry
    }

    /// Load a registry from a JSON map of intent type → rules.
    pub fn from_json(value: JsonValue) -> MdmResult<Self> {
        let parsed: HashMap<String, Vec<Rule>> = serde_json::from_value(value)
            .map_err(|e| MdmError::validation(format!("invalid ruleset document: {e}")))?;
        let mut registry = Self::new();
        for (intent_type, rules) in parsed {
            for rule in rules {
                if rule.intent_type != intent_type {
                    return Err(MdmError::validation(format!(
                        "rule '{}' is keyed under '{intent_type}' but targets '{}'",
                        rule.id, rule.intent_type
                    )));
                }
                registry.add(rule);
            }
        }
        Ok(registry)
    }

    pub fn add(&mut self, rule: Rule) {
        self.by_intent_type
            .entry(rule.intent_type.clone())
            .or_default()
            .push(rule);
    }

    /// Rules for one intent type, in source order. Empty when none are
    /// registered (evaluation then approves by default).
    pub fn rules_for(&self, intent_type: &str) -> &[Rule] {
        self.by_intent_type
            .get(intent_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn reject_rule(
    id: &str,
    intent_type: &str,
    priority: i32,
    flag: &str,
    message: &str,
) -> Rule {
    Rule {
        id: id.to_string(),
        name: id.replace('-', " "),
        priority,
        intent_type: intent_type.to_string(),
        phase: RulePhase::Validate,
        conditions: vec![Condition {
            field: flag.to_string(),
            operator: ConditionOperator::Eq,
            value: Some(json!(true)),
        }],
        action: RuleAction::Reject,
        effective_from: None,
        effective_to: None,
        rejection_message: Some(message.to_string()),
        approver_role: None,
        enrich_fields: None,
    }
}

fn route_rule(
    id: &str,
    intent_type: &str,
    field: &str,
    threshold: i64,
    approver_role: &str,
) -> Rule {
    Rule {
        id: id.to_string(),
        name: id.replace('-', " "),
        priority: 100,
        intent_type: intent_type.to_string(),
        phase: RulePhase::Decide,
        conditions: vec![Condition {
            field: field.to_string(),
            operator: ConditionOperator::Gt,
            value: Some(json!(threshold)),
        }],
        action: RuleAction::RouteForApproval,
        effective_from: None,
        effective_to: None,
        rejection_message: None,
        approver_role: Some(approver_role.to_string()),
        enrich_fields: None,
    }
}

fn default_rules() -> Vec<Rule> {
    vec![
        reject_rule(
            "vendor-name-required",
            "mdm.vendor.create",
            10,
            "_name_missing",
            "vendor name is required",
        ),
        reject_rule(
            "vendor-name-required",
            "mdm.vendor.update",
            10,
            "_name_missing",
            "vendor name is required",
        ),
        route_rule(
            "vendor-high-spend-approval",
            "mdm.vendor.create",
            "data.annual_spend",
            100_000,
            "finance_manager",
        ),
        reject_rule(
            "item-name-required",
            "mdm.item.create",
            10,
            "_name_missing",
            "item name is required",
        ),
        reject_rule(
            "item-sku-duplicate",
            "mdm.item.create",
            20,
            "_sku_duplicate_exists",
            "an item with this SKU already exists in this legal entity",
        ),
        reject_rule(
            "item-name-required",
            "mdm.item.update",
            10,
            "_name_missing",
            "item name is required",
        ),
        reject_rule(
            "item-sku-duplicate",
            "mdm.item.update",
            20,
            "_sku_duplicate_exists",
            "an item with this SKU already exists in this legal entity",
        ),
        route_rule(
            "item-high-value-approval",
            "mdm.item.create",
            "data.unit_price",
            10_000,
            "finance_manager",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_master_data_intent_types() {
        let registry = RulesetRegistry::master_data_defaults();
        for intent_type in [
            "mdm.vendor.create",
            "mdm.vendor.update",
            "mdm.item.create",
            "mdm.item.update",
        ] {
            assert!(!registry.rules_for(intent_type).is_empty(), "{intent_type}");
        }
        assert!(registry.rules_for("mdm.unknown").is_empty());
    }

    #[test]
    fn from_json_round_trips_and_checks_keys() {
        let registry = RulesetRegistry::master_data_defaults();
        let document = json!({
            "mdm.vendor.create": registry.rules_for("mdm.vendor.create"),
        });
        let loaded = RulesetRegistry::from_json(document).unwrap();
        assert_eq!(
            loaded.rules_for("mdm.vendor.create"),
            registry.rules_for("mdm.vendor.create")
        );

        let mismatched = json!({
            "mdm.item.create": registry.rules_for("mdm.vendor.create"),
        });
        assert!(RulesetRegistry::from_json(mismatched).is_err());
    }
}
