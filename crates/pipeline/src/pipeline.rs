//! Intent routing and the services handlers execute against.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use keystone_core::{
    Intent, IntentId, IntentResult, IntentStatus, MdmError, MdmResult, StoredIntent,
};
use keystone_projections::ProjectionEngine;
use keystone_store::{EntityGraph, EventStore, Storage};

use crate::handlers::IntentHandler;
use crate::rulesets::RulesetRegistry;

/// Everything a handler needs for one turn. Shared, read-only after boot.
pub struct PipelineServices<S: Storage> {
    pub storage: Arc<S>,
    pub events: Arc<EventStore<S>>,
    pub entities: Arc<EntityGraph<S>>,
    pub projections: Arc<ProjectionEngine<S>>,
    pub rulesets: Arc<RulesetRegistry>,
}

/// Routes intents to their handlers and enforces the pipeline contract:
/// missing handler is a failed result (not an error), capability checks
/// happen before any handler work, and routed intents are persisted for
/// later approval.
pub struct IntentPipeline<S: Storage> {
    services: PipelineServices<S>,
    handlers: HashMap<String, Arc<dyn IntentHandler<S>>>,
}

impl<S: Storage> IntentPipeline<S> {
    pub fn new(services: PipelineServices<S>) -> Self {
        Self {
            services,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for its intent type. Startup-time only.
    pub fn register_handler(&mut self, handler: Arc<dyn IntentHandler<S>>) {
        self.handlers.insert(handler.intent_type().to_string(), handler);
    }

    pub fn services(&self) -> &PipelineServices<S> {
        &self.services
    }

    /// Execute one intent as one ACID turn.
    #[instrument(skip(self, intent), fields(intent_type = %intent.intent_type), err)]
    pub async fn execute(&self, intent: Intent) -> MdmResult<IntentResult> {
        let intent_id = IntentId::new();

        let Some(handler) = self.handlers.get(&intent.intent_type) else {
            return Ok(IntentResult::failed(
                intent_id,
                format!("No handler registered for intent type '{}'", intent.intent_type),
            ));
        };

        if !intent.actor.has_capability(&intent.intent_type) {
            return Err(MdmError::authorization(intent.intent_type.clone()));
        }

        let result = handler.execute(&self.services, &intent, intent_id).await?;

        if result.status == Some(IntentStatus::PendingApproval) {
            self.persist_pending(&intent, &result).await?;
        }

        Ok(result)
    }

    /// Keep a routed intent replayable for the approval flow.
    async fn persist_pending(&self, intent: &Intent, result: &IntentResult) -> MdmResult<()> {
        let stored = StoredIntent {
            intent_id: result.intent_id,
            intent_type: intent.intent_type.clone(),
            intent: intent.clone(),
            status: IntentStatus::PendingApproval,
            required_approver_role: result.required_approver_role.clone(),
            submitted_at: Utc::now(),
        };

        let mut uow = self.services.storage.begin().await?;
        self.services.storage.insert_intent(&mut uow, &stored).await?;
        self.services.storage.commit(uow).await?;
        tracing::info!(
            intent_id = %stored.intent_id,
            approver_role = ?stored.required_approver_role,
            "intent routed for approval"
        );
        Ok(())
    }
}
