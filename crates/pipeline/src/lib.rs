//! Intent pipeline: one ACID turn per intent.
//!
//! The pipeline routes intents to handlers; each handler runs the canonical
//! turn inside a single unit of work — idempotency short-circuit,
//! preconditions, phased rule evaluation, entity mutation, event append,
//! synchronous projection update, commit.

pub mod context;
pub mod handlers;
pub mod pipeline;
pub mod rulesets;

#[cfg(test)]
mod integration_tests;

pub use handlers::{master_data_handlers, IntentHandler, MasterDataType};
pub use pipeline::{IntentPipeline, PipelineServices};
pub use rulesets::RulesetRegistry;
