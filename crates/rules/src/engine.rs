//! Phased rule evaluation.

use std::time::Instant;

use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use keystone_core::{RuleTrace, TraceResult};

use crate::rule::{Condition, ConditionOperator, Rule, RuleAction, RulePhase};

/// Final decision of one evaluation run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
    RouteForApproval,
}

/// Evaluation output: decision, one trace per processed rule (in evaluation
/// order), and the side-channel outputs of the firing rules.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub traces: Vec<RuleTrace>,
    pub rejection_message: Option<String>,
    pub required_approver_role: Option<String>,
    /// Present iff at least one enrich rule fired; the context as later rules
    /// saw it.
    pub enriched_context: Option<JsonValue>,
}

/// Keep only rules in effect on `today`.
pub fn filter_active_rules(rules: &[Rule], today: NaiveDate) -> Vec<Rule> {
    rules.iter().filter(|r| r.is_active(today)).cloned().collect()
}

/// Evaluate a flat rule set in priority order, ignoring phases.
pub fn evaluate(rules: &[Rule], context: &JsonValue, today: NaiveDate) -> Evaluation {
    let mut ordered: Vec<&Rule> = rules.iter().collect();
    sort_stable(&mut ordered);
    run(&ordered, context, today)
}

/// Evaluate validate → enrich → decide, each phase in ascending priority.
///
/// A firing reject terminates evaluation immediately. Enrichments merge into
/// the running context, visible to every subsequent rule. Route-for-approval
/// records the earliest-firing approver role and, absent a later reject,
/// yields `Decision::RouteForApproval`.
pub fn evaluate_phased(rules: &[Rule], context: &JsonValue, today: NaiveDate) -> Evaluation {
    let mut ordered: Vec<&Rule> = Vec::with_capacity(rules.len());
    for phase in [RulePhase::Validate, RulePhase::Enrich, RulePhase::Decide] {
        let mut in_phase: Vec<&Rule> = rules.iter().filter(|r| r.phase == phase).collect();
        sort_stable(&mut in_phase);
        ordered.extend(in_phase);
    }
    run(&ordered, context, today)
}

/// Stable by priority: equal priorities keep rule-set source order.
fn sort_stable(rules: &mut [&Rule]) {
    rules.sort_by_key(|r| r.priority);
}

fn run(ordered: &[&Rule], context: &JsonValue, today: NaiveDate) -> Evaluation {
    let mut ctx = context.clone();
    let mut traces = Vec::with_capacity(ordered.len());
    let mut rejection: Option<String> = None;
    let mut approver: Option<String> = None;
    let mut enriched = false;

    let intent_type = ctx.get("intent_type").and_then(|v| v.as_str()).map(String::from);

    for rule in ordered {
        let started = Instant::now();

        if !rule.is_active(today) {
            traces.push(trace(rule, TraceResult::SkippedInactive, None, started));
            continue;
        }

        if let Some(ref it) = intent_type {
            if rule.intent_type != *it {
                traces.push(trace(rule, TraceResult::NotApplicable, None, started));
                continue;
            }
        }

        if !rule.conditions.iter().all(|c| condition_holds(c, &ctx)) {
            traces.push(trace(rule, TraceResult::ConditionFalse, None, started));
            continue;
        }

        let action = rule.action.as_str().to_string();
        match rule.action {
            RuleAction::Reject => {
                traces.push(trace(rule, TraceResult::Fired, Some(action), started));
                rejection = Some(
                    rule.rejection_message
                        .clone()
                        .unwrap_or_else(|| format!("rejected by rule '{}'", rule.name)),
                );
                break;
            }
            RuleAction::RouteForApproval => {
                traces.push(trace(rule, TraceResult::Fired, Some(action), started));
                if approver.is_none() {
                    approver = rule.approver_role.clone();
                }
            }
            RuleAction::Enrich => {
                if let Some(fields) = &rule.enrich_fields {
                    if let Some(obj) = ctx.as_object_mut() {
                        for (k, v) in fields {
                            obj.insert(k.clone(), v.clone());
                        }
                        enriched = true;
                    }
                }
                traces.push(trace(rule, TraceResult::Fired, Some(action), started));
            }
            RuleAction::Approve => {
                traces.push(trace(rule, TraceResult::Fired, Some(action), started));
            }
        }
    }

    let decision = if rejection.is_some() {
        Decision::Reject
    } else if approver.is_some() {
        Decision::RouteForApproval
    } else {
        Decision::Approve
    };

    Evaluation {
        decision,
        traces,
        rejection_message: rejection,
        required_approver_role: approver,
        enriched_context: enriched.then_some(ctx),
    }
}

fn trace(rule: &Rule, result: TraceResult, actions_taken: Option<String>, started: Instant) -> RuleTrace {
    RuleTrace {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        result,
        actions_taken,
        evaluation_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}

/// Resolve a dot-path into the context.
fn resolve<'a>(context: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn condition_holds(condition: &Condition, context: &JsonValue) -> bool {
    let resolved = resolve(context, &condition.field).filter(|v| !v.is_null());
    let expected = condition.value.as_ref();

    match condition.operator {
        ConditionOperator::Eq => matches!((resolved, expected), (Some(a), Some(b)) if a == b),
        ConditionOperator::Neq => match (resolved, expected) {
            (Some(a), Some(b)) => a != b,
            (None, Some(_)) => true,
            _ => false,
        },
        ConditionOperator::NotEmpty => match resolved {
            Some(JsonValue::String(s)) => !s.trim().is_empty(),
            Some(JsonValue::Array(a)) => !a.is_empty(),
            Some(JsonValue::Object(o)) => !o.is_empty(),
            Some(_) => true,
            None => false,
        },
        ConditionOperator::In => in_list(resolved, expected),
        ConditionOperator::NotIn => !in_list(resolved, expected),
        ConditionOperator::Exists => resolved.is_some(),
        ConditionOperator::Gt => compare(resolved, expected, |o| o == std::cmp::Ordering::Greater),
        ConditionOperator::Lt => compare(resolved, expected, |o| o == std::cmp::Ordering::Less),
        ConditionOperator::Gte => compare(resolved, expected, |o| o != std::cmp::Ordering::Less),
        ConditionOperator::Lte => compare(resolved, expected, |o| o != std::cmp::Ordering::Greater),
        ConditionOperator::Matches => {
            let (Some(JsonValue::String(s)), Some(JsonValue::String(pattern))) = (resolved, expected)
            else {
                return false;
            };
            match regex::Regex::new(pattern) {
                Ok(re) => re.is_match(s),
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "invalid rule regex");
                    false
                }
            }
        }
    }
}

fn in_list(resolved: Option<&JsonValue>, expected: Option<&JsonValue>) -> bool {
    match (resolved, expected) {
        (Some(v), Some(JsonValue::Array(list))) => list.contains(v),
        _ => false,
    }
}

fn compare(
    resolved: Option<&JsonValue>,
    expected: Option<&JsonValue>,
    check: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let (Some(a), Some(b)) = (resolved, expected) else {
        return false;
    };
    let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
        return false;
    };
    a.partial_cmp(&b).map(&check).unwrap_or(false)
}
