//! Declarative, phased rule evaluation.
//!
//! Rules are data: deserializable, effective-dated, and evaluated
//! deterministically against a JSON context. Evaluation produces a decision
//! plus one trace per processed rule; traces are persisted on the emitting
//! event by the intent pipeline.

pub mod engine;
pub mod rule;

pub use engine::{evaluate, evaluate_phased, filter_active_rules, Decision, Evaluation};
pub use rule::{Condition, ConditionOperator, Rule, RuleAction, RulePhase};
