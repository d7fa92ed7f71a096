//! Intent handlers for master-data types.
//!
//! One handler executes one canonical turn inside a single unit of work:
//!
//! 1. idempotency short-circuit (replay without a new commit)
//! 2. preconditions: load referenced entities, resolve scope, derive flags
//! 3. phased rule evaluation (reject / route end the turn without a commit)
//! 4. entity-graph mutation
//! 5. event append — for updates *before* the entity update, with
//!    `expected_entity_version` equal to the baseline, so event-store OCC and
//!    entity-graph OCC agree
//! 6. synchronous projection apply
//! 7. commit
//!
//! Handlers are table-driven: a [`MasterDataType`] describes one entity type
//! (vendor, item, …) and yields its create and update handlers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use keystone_core::{
    AppendEvent, Entity, EntityId, EntityRef, Intent, IntentId, IntentResult, MdmError,
    MdmResult, Scope,
};
use keystone_rules::{evaluate_phased, Decision, Evaluation};
use keystone_store::Storage;

use crate::context;
use crate::pipeline::PipelineServices;

/// Handles one intent type end to end.
#[async_trait]
pub trait IntentHandler<S: Storage>: Send + Sync {
    fn intent_type(&self) -> &str;

    async fn execute(
        &self,
        services: &PipelineServices<S>,
        intent: &Intent,
        intent_id: IntentId,
    ) -> MdmResult<IntentResult>;
}

/// Declarative description of one master-data entity type.
#[derive(Debug, Clone)]
pub struct MasterDataType {
    pub entity_type: String,
    pub create_intent: String,
    pub update_intent: String,
    pub created_event: String,
    pub updated_event: String,
    /// Attribute enforced unique per legal entity (e.g. `sku`); drives the
    /// `_<attr>_duplicate_exists` flag the rules see.
    pub unique_attribute: Option<String>,
}

impl MasterDataType {
    pub fn vendor() -> Self {
        Self {
            entity_type: "vendor".to_string(),
            create_intent: "mdm.vendor.create".to_string(),
            update_intent: "mdm.vendor.update".to_string(),
            created_event: "mdm.vendor.created".to_string(),
            updated_event: "mdm.vendor.updated".to_string(),
            unique_attribute: None,
        }
    }

    pub fn item() -> Self {
        Self {
            entity_type: "item".to_string(),
            create_intent: "mdm.item.create".to_string(),
            update_intent: "mdm.item.update".to_string(),
            created_event: "mdm.item.created".to_string(),
            updated_event: "mdm.item.updated".to_string(),
            unique_attribute: Some("sku".to_string()),
        }
    }
}

/// Create and update handlers for every built-in master-data type.
pub fn master_data_handlers<S: Storage>() -> Vec<Arc<dyn IntentHandler<S>>> {
    let mut handlers: Vec<Arc<dyn IntentHandler<S>>> = Vec::new();
    for config in [MasterDataType::vendor(), MasterDataType::item()] {
        let config = Arc::new(config);
        handlers.push(Arc::new(CreateHandler {
            config: config.clone(),
        }));
        handlers.push(Arc::new(UpdateHandler { config }));
    }
    handlers
}

enum Turn {
    Commit(IntentResult),
    Discard(IntentResult),
}

pub struct CreateHandler {
    config: Arc<MasterDataType>,
}

#[async_trait]
impl<S: Storage> IntentHandler<S> for CreateHandler {
    fn intent_type(&self) -> &str {
        &self.config.create_intent
    }

    async fn execute(
        &self,
        services: &PipelineServices<S>,
        intent: &Intent,
        intent_id: IntentId,
    ) -> MdmResult<IntentResult> {
        let mut uow = services.storage.begin().await?;
        match self.turn(services, &mut uow, intent, intent_id).await {
            Ok(Turn::Commit(result)) => {
                services.storage.commit(uow).await?;
                Ok(result)
            }
            Ok(Turn::Discard(result)) => {
                services.storage.rollback(uow).await?;
                Ok(result)
            }
            Err(err) => {
                if let Err(rollback_err) = services.storage.rollback(uow).await {
                    tracing::warn!(error = %rollback_err, "rollback after failed turn also failed");
                }
                Err(err)
            }
        }
    }
}

impl CreateHandler {
    async fn turn<S: Storage>(
        &self,
        services: &PipelineServices<S>,
        uow: &mut S::Uow,
        intent: &Intent,
        intent_id: IntentId,
    ) -> MdmResult<Turn> {
        if let Some(replay) = replay_for(services, uow, intent, intent_id).await? {
            return Ok(Turn::Discard(replay));
        }

        let scope = context::resolve_scope(intent);

        // Preconditions: derive the flags the rules evaluate.
        let duplicate_flag =
            duplicate_probe(services, uow, &self.config, intent, &scope, None).await?;
        let ctx = context::build_context(
            intent,
            &scope,
            None,
            duplicate_flag.as_ref().map(|(a, e)| (a.as_str(), *e)),
        );

        let evaluation = evaluate_phased(
            services.rulesets.rules_for(&intent.intent_type),
            &ctx,
            Utc::now().date_naive(),
        );
        if let Some(turn) = non_approve_turn(intent_id, &evaluation) {
            return Ok(turn);
        }

        // Mutate the graph, then record the fact.
        let entity_id = intent.entity_id.unwrap_or_default();
        services
            .entities
            .create(
                uow,
                &self.config.entity_type,
                entity_id,
                intent.data.clone(),
                scope.legal_entity.clone(),
            )
            .await?;

        let outcome = services
            .events
            .append(
                uow,
                append_input(
                    &self.config.created_event,
                    intent,
                    intent_id,
                    scope,
                    &self.config.entity_type,
                    entity_id,
                    None,
                    &evaluation,
                ),
            )
            .await?;
        if outcome.is_replay() {
            return Ok(Turn::Discard(IntentResult::committed(intent_id, outcome.into_event())));
        }

        let event = outcome.into_event();
        services.projections.process_event(uow, &event).await?;
        Ok(Turn::Commit(IntentResult::committed(intent_id, event)))
    }
}

pub struct UpdateHandler {
    config: Arc<MasterDataType>,
}

#[async_trait]
impl<S: Storage> IntentHandler<S> for UpdateHandler {
    fn intent_type(&self) -> &str {
        &self.config.update_intent
    }

    async fn execute(
        &self,
        services: &PipelineServices<S>,
        intent: &Intent,
        intent_id: IntentId,
    ) -> MdmResult<IntentResult> {
        let mut uow = services.storage.begin().await?;
        match self.turn(services, &mut uow, intent, intent_id).await {
            Ok(Turn::Commit(result)) => {
                services.storage.commit(uow).await?;
                Ok(result)
            }
            Ok(Turn::Discard(result)) => {
                services.storage.rollback(uow).await?;
                Ok(result)
            }
            Err(err) => {
                if let Err(rollback_err) = services.storage.rollback(uow).await {
                    tracing::warn!(error = %rollback_err, "rollback after failed turn also failed");
                }
                Err(err)
            }
        }
    }
}

impl UpdateHandler {
    async fn turn<S: Storage>(
        &self,
        services: &PipelineServices<S>,
        uow: &mut S::Uow,
        intent: &Intent,
        intent_id: IntentId,
    ) -> MdmResult<Turn> {
        if let Some(replay) = replay_for(services, uow, intent, intent_id).await? {
            return Ok(Turn::Discard(replay));
        }

        let scope = context::resolve_scope(intent);
        let entity_id = intent
            .entity_id
            .ok_or_else(|| MdmError::validation_field("entity_id", "update intents require a target entity"))?;

        let current = services
            .entities
            .get(
                Some(&mut *uow),
                &self.config.entity_type,
                entity_id,
                Some(&scope.legal_entity),
            )
            .await?
            .ok_or_else(|| MdmError::not_found(self.config.entity_type.clone(), entity_id))?;

        let duplicate_flag =
            duplicate_probe(services, uow, &self.config, intent, &scope, Some(entity_id)).await?;
        let ctx = context::build_context(
            intent,
            &scope,
            Some(&current),
            duplicate_flag.as_ref().map(|(a, e)| (a.as_str(), *e)),
        );

        let evaluation = evaluate_phased(
            services.rulesets.rules_for(&intent.intent_type),
            &ctx,
            Utc::now().date_naive(),
        );
        if let Some(turn) = non_approve_turn(intent_id, &evaluation) {
            return Ok(turn);
        }

        // The event is the source of truth: append first, with the same OCC
        // baseline the entity update will use.
        let expected_version = intent.expected_entity_version.unwrap_or(current.version);
        let outcome = services
            .events
            .append(
                uow,
                append_input(
                    &self.config.updated_event,
                    intent,
                    intent_id,
                    scope.clone(),
                    &self.config.entity_type,
                    entity_id,
                    Some(expected_version),
                    &evaluation,
                ),
            )
            .await?;
        if outcome.is_replay() {
            return Ok(Turn::Discard(IntentResult::committed(intent_id, outcome.into_event())));
        }

        services
            .entities
            .update(
                uow,
                &self.config.entity_type,
                entity_id,
                intent.data.clone(),
                expected_version,
                &scope.legal_entity,
            )
            .await?;

        let event = outcome.into_event();
        services.projections.process_event(uow, &event).await?;
        Ok(Turn::Commit(IntentResult::committed(intent_id, event)))
    }
}

/// Step 2 of the turn: a known idempotency key resolves to the stored event
/// as a successful replay, with no new commit.
async fn replay_for<S: Storage>(
    services: &PipelineServices<S>,
    uow: &mut S::Uow,
    intent: &Intent,
    intent_id: IntentId,
) -> MdmResult<Option<IntentResult>> {
    let Some(key) = &intent.idempotency_key else {
        return Ok(None);
    };
    let existing = services
        .storage
        .event_by_idempotency_key(Some(uow), key)
        .await?;
    Ok(existing.map(|event| {
        tracing::debug!(idempotency_key = %key, event_id = %event.id, "intent replayed");
        IntentResult::committed(intent_id, event)
    }))
}

/// Probe the unique attribute (when the type has one) for an existing holder
/// of the submitted value, excluding the entity being updated.
async fn duplicate_probe<S: Storage>(
    services: &PipelineServices<S>,
    uow: &mut S::Uow,
    config: &MasterDataType,
    intent: &Intent,
    scope: &Scope,
    exclude: Option<EntityId>,
) -> MdmResult<Option<(String, bool)>> {
    let Some(attribute) = &config.unique_attribute else {
        return Ok(None);
    };
    let Some(value) = intent.data.get(attribute.as_str()) else {
        return Ok(Some((attribute.clone(), false)));
    };

    let holder: Option<Entity> = services
        .entities
        .get_by_attribute(Some(uow), &config.entity_type, attribute, value, &scope.legal_entity)
        .await?;
    let exists = holder
        .filter(|e| exclude != Some(e.entity_id))
        .is_some();
    Ok(Some((attribute.clone(), exists)))
}

/// Convert a reject or route decision into its terminal turn.
fn non_approve_turn(intent_id: IntentId, evaluation: &Evaluation) -> Option<Turn> {
    match evaluation.decision {
        Decision::Reject => Some(Turn::Discard(IntentResult::rejected(
            intent_id,
            evaluation
                .rejection_message
                .clone()
                .unwrap_or_else(|| "rejected".to_string()),
            evaluation.traces.clone(),
        ))),
        Decision::RouteForApproval => Some(Turn::Discard(IntentResult::routed(
            intent_id,
            evaluation
                .required_approver_role
                .clone()
                .unwrap_or_else(|| "unspecified".to_string()),
            evaluation.traces.clone(),
        ))),
        Decision::Approve => None,
    }
}

#[allow(clippy::too_many_arguments)]
fn append_input(
    event_type: &str,
    intent: &Intent,
    intent_id: IntentId,
    scope: Scope,
    entity_type: &str,
    entity_id: EntityId,
    expected_entity_version: Option<i64>,
    evaluation: &Evaluation,
) -> AppendEvent {
    AppendEvent {
        event_type: event_type.to_string(),
        schema_version: 1,
        occurred_at: intent.occurred_at.unwrap_or_else(Utc::now),
        effective_date: intent.effective_date,
        scope,
        actor: intent.actor.clone(),
        intent_id: Some(intent_id),
        correlation_id: intent.correlation_id,
        caused_by: None,
        data: intent.data.clone(),
        entities: vec![EntityRef::subject(entity_type, entity_id)],
        rules_evaluated: evaluation.traces.clone(),
        idempotency_key: intent.idempotency_key.clone(),
        expected_entity_version,
    }
}
