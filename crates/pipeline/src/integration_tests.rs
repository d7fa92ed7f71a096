//! Integration tests for the full intent → event → projection pipeline.
//!
//! Runs the real services over the in-memory storage driver:
//! intent pipeline → rules → entity graph → event store → projections,
//! all inside one unit of work per turn.

use std::sync::Arc;

use serde_json::json;

use keystone_core::{
    Actor, ActorType, EntityId, Intent, IntentStatus, LegalEntity, MdmError, TraceResult,
};
use keystone_projections::{MasterDataProjection, ProjectionEngine, ProjectionTable};
use keystone_store::{
    EntityGraph, EventStore, EventTypeRegistry, MemStorage, Storage,
};

use crate::handlers::master_data_handlers;
use crate::pipeline::{IntentPipeline, PipelineServices};
use crate::rulesets::RulesetRegistry;

fn platform() -> (Arc<MemStorage>, IntentPipeline<MemStorage>) {
    let storage = Arc::new(MemStorage::new());
    let registry = Arc::new(EventTypeRegistry::new(storage.clone()));
    let events = Arc::new(EventStore::new(storage.clone(), registry));
    let entities = Arc::new(EntityGraph::new(storage.clone()));

    let mut engine = ProjectionEngine::new(storage.clone());
    for (projection_type, projection) in [
        ("vendor_list", MasterDataProjection::vendor_list()),
        ("item_catalog", MasterDataProjection::item_catalog()),
    ] {
        engine.register_table(
            projection_type,
            ProjectionTable {
                table_name: projection_type.to_string(),
                primary_key: "pk".to_string(),
            },
        );
        engine.register_handler(Arc::new(projection));
    }

    let services = PipelineServices {
        storage: storage.clone(),
        events,
        entities,
        projections: Arc::new(engine),
        rulesets: Arc::new(RulesetRegistry::master_data_defaults()),
    };

    let mut pipeline = IntentPipeline::new(services);
    for handler in master_data_handlers() {
        pipeline.register_handler(handler);
    }
    (storage, pipeline)
}

fn actor(legal_entity: &str, capabilities: &[&str]) -> Actor {
    Actor {
        sub: "u-1".to_string(),
        name: "Pat".to_string(),
        actor_type: ActorType::Human,
        legal_entity: Some(LegalEntity::new(legal_entity)),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
    }
}

fn intent(intent_type: &str, legal_entity: &str, data: serde_json::Value) -> Intent {
    Intent {
        intent_type: intent_type.to_string(),
        actor: actor(legal_entity, &[intent_type]),
        data,
        entity_id: None,
        expected_entity_version: None,
        idempotency_key: None,
        correlation_id: None,
        occurred_at: None,
        effective_date: None,
    }
}

async fn committed_event_count(storage: &Arc<MemStorage>) -> usize {
    storage.events_after(0, 10_000).await.unwrap().len()
}

#[tokio::test]
async fn vendor_create_happy_path() {
    let (storage, pipeline) = platform();

    let result = pipeline
        .execute(intent("mdm.vendor.create", "acme", json!({ "name": "Acme" })))
        .await
        .unwrap();

    assert!(result.success);
    let event = result.event.expect("committed event");
    assert_eq!(event.event_type, "mdm.vendor.created");
    assert_eq!(event.scope.legal_entity, LegalEntity::new("acme"));
    assert_eq!(committed_event_count(&storage).await, 1);

    // Entity row at version 1.
    let subject = event.subject().unwrap();
    let entity = storage
        .entity_by_key(None, "vendor", subject.entity_id)
        .await
        .unwrap()
        .expect("vendor entity");
    assert_eq!(entity.version, 1);

    // Projection row committed with the event.
    let rows = storage.projection_rows(None, "vendor_list").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data["name"], json!("Acme"));
    assert_eq!(rows[0].legal_entity, LegalEntity::new("acme"));
}

#[tokio::test]
async fn duplicate_sku_is_rejected_without_an_event() {
    let (storage, pipeline) = platform();

    let first = pipeline
        .execute(intent("mdm.item.create", "acme", json!({ "name": "Widget", "sku": "X-1" })))
        .await
        .unwrap();
    assert!(first.success);
    assert_eq!(committed_event_count(&storage).await, 1);

    let second = pipeline
        .execute(intent("mdm.item.create", "acme", json!({ "name": "Copy", "sku": "X-1" })))
        .await
        .unwrap();
    assert!(!second.success);
    assert!(second.error.unwrap().contains("SKU"));
    // The rejection committed nothing.
    assert_eq!(committed_event_count(&storage).await, 1);

    // Same SKU under another legal entity is fine (scope isolation).
    let elsewhere = pipeline
        .execute(intent("mdm.item.create", "globex", json!({ "name": "Widget", "sku": "X-1" })))
        .await
        .unwrap();
    assert!(elsewhere.success);
}

#[tokio::test]
async fn idempotent_replay_returns_the_same_event() {
    let (storage, pipeline) = platform();

    let mut submit = intent("mdm.vendor.create", "acme", json!({ "name": "Acme" }));
    submit.idempotency_key = Some("k-1".to_string());

    let first = pipeline.execute(submit.clone()).await.unwrap();
    let second = pipeline.execute(submit).await.unwrap();

    assert!(first.success && second.success);
    assert_eq!(first.event_id, second.event_id);

    let events = storage.events_after(0, 100).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].idempotency_key.as_deref(), Some("k-1"));
}

#[tokio::test]
async fn stale_expected_version_conflicts_and_commits_exactly_once() {
    let (storage, pipeline) = platform();

    let created = pipeline
        .execute(intent("mdm.vendor.create", "acme", json!({ "name": "Acme" })))
        .await
        .unwrap();
    let entity_id = created.event.unwrap().subject().unwrap().entity_id;

    // Bring the vendor to version 3.
    for revision in ["v2", "v3"] {
        let mut update = intent("mdm.vendor.update", "acme", json!({ "name": revision }));
        update.entity_id = Some(entity_id);
        assert!(pipeline.execute(update).await.unwrap().success);
    }

    // Two writers race from the same baseline; exactly one commits.
    let mut winner = intent("mdm.vendor.update", "acme", json!({ "name": "winner" }));
    winner.entity_id = Some(entity_id);
    winner.expected_entity_version = Some(3);
    assert!(pipeline.execute(winner).await.unwrap().success);

    let mut loser = intent("mdm.vendor.update", "acme", json!({ "name": "loser" }));
    loser.entity_id = Some(entity_id);
    loser.expected_entity_version = Some(3);
    let err = pipeline.execute(loser).await.unwrap_err();
    match err {
        MdmError::ConcurrencyConflict { expected, actual, .. } => {
            assert_eq!(expected, 3);
            assert_eq!(actual, 4);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }

    let entity = storage
        .entity_by_key(None, "vendor", entity_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entity.version, 4);
    assert_eq!(entity.attributes["name"], json!("winner"));
}

#[tokio::test]
async fn high_spend_vendor_routes_for_approval() {
    let (storage, pipeline) = platform();

    let result = pipeline
        .execute(intent(
            "mdm.vendor.create",
            "acme",
            json!({ "name": "Big Vendor", "annual_spend": 250_000 }),
        ))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.is_none());
    assert_eq!(result.status, Some(IntentStatus::PendingApproval));
    assert_eq!(result.required_approver_role.as_deref(), Some("finance_manager"));

    // No event committed; the intent itself is persisted.
    assert_eq!(committed_event_count(&storage).await, 0);
    let stored = storage.intent_by_id(result.intent_id).await.unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::PendingApproval);
    assert_eq!(stored.intent.data["name"], json!("Big Vendor"));
}

#[tokio::test]
async fn missing_capability_is_an_authorization_error() {
    let (_storage, pipeline) = platform();

    let mut submit = intent("mdm.vendor.create", "acme", json!({ "name": "Acme" }));
    submit.actor = actor("acme", &["mdm.item.create"]);

    let err = pipeline.execute(submit).await.unwrap_err();
    match err {
        MdmError::Authorization { required } => assert_eq!(required, "mdm.vendor.create"),
        other => panic!("expected Authorization, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_intent_type_is_a_failed_result() {
    let (_storage, pipeline) = platform();

    let result = pipeline
        .execute(intent("mdm.warehouse.create", "acme", json!({})))
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("No handler"));
}

#[tokio::test]
async fn rule_traces_are_persisted_on_the_event() {
    let (storage, pipeline) = platform();

    let result = pipeline
        .execute(intent("mdm.vendor.create", "acme", json!({ "name": "Acme" })))
        .await
        .unwrap();

    let event = storage
        .event_by_id(result.event_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    // Every vendor-create rule left exactly one trace, in evaluation order.
    let ids: Vec<&str> = event.rules_evaluated.iter().map(|t| t.rule_id.as_str()).collect();
    assert_eq!(ids, vec!["vendor-name-required", "vendor-high-spend-approval"]);
    assert!(event
        .rules_evaluated
        .iter()
        .all(|t| t.result == TraceResult::ConditionFalse));
}

#[tokio::test]
async fn rejected_intent_reports_its_traces() {
    let (_storage, pipeline) = platform();

    let result = pipeline
        .execute(intent("mdm.vendor.create", "acme", json!({})))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("vendor name is required"));
    let traces = result.traces.unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].rule_id, "vendor-name-required");
    assert_eq!(traces[0].result, TraceResult::Fired);
}

#[tokio::test]
async fn entity_versions_map_one_to_one_onto_subject_events() {
    let (storage, pipeline) = platform();

    let created = pipeline
        .execute(intent("mdm.vendor.create", "acme", json!({ "name": "v1" })))
        .await
        .unwrap();
    let entity_id = created.event.unwrap().subject().unwrap().entity_id;

    for revision in ["v2", "v3", "v4"] {
        let mut update = intent("mdm.vendor.update", "acme", json!({ "name": revision }));
        update.entity_id = Some(entity_id);
        assert!(pipeline.execute(update).await.unwrap().success);
    }

    let entity = storage
        .entity_by_key(None, "vendor", entity_id)
        .await
        .unwrap()
        .unwrap();
    let subject_events: Vec<_> = storage
        .events_after(0, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.subject().map(|s| s.entity_id) == Some(entity_id))
        .collect();

    assert_eq!(entity.version, subject_events.len() as i64);

    // Sequence order is strictly increasing across the committed turns.
    let sequences: Vec<i64> = subject_events.iter().map(|e| e.sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort();
    assert_eq!(sequences, sorted);
}

#[tokio::test]
async fn update_of_entity_in_another_scope_is_not_found() {
    let (_storage, pipeline) = platform();

    let created = pipeline
        .execute(intent("mdm.vendor.create", "acme", json!({ "name": "Acme" })))
        .await
        .unwrap();
    let entity_id = created.event.unwrap().subject().unwrap().entity_id;

    let mut update = intent("mdm.vendor.update", "globex", json!({ "name": "hijack" }));
    update.entity_id = Some(entity_id);
    let err = pipeline.execute(update).await.unwrap_err();
    assert!(matches!(err, MdmError::EntityNotFound { .. }));
}

#[tokio::test]
async fn rejected_and_routed_turns_leave_no_projection_rows() {
    let (storage, pipeline) = platform();

    pipeline
        .execute(intent("mdm.vendor.create", "acme", json!({})))
        .await
        .unwrap();
    pipeline
        .execute(intent(
            "mdm.vendor.create",
            "acme",
            json!({ "name": "Big", "annual_spend": 500_000 }),
        ))
        .await
        .unwrap();

    assert!(storage
        .projection_rows(None, "vendor_list")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn system_intent_without_scope_falls_back_to_default() {
    let (storage, pipeline) = platform();

    let mut submit = intent("mdm.vendor.create", "acme", json!({ "name": "Seeded" }));
    submit.actor = Actor {
        capabilities: vec!["mdm.vendor.create".to_string()],
        ..Actor::system("bootstrap")
    };

    let result = pipeline.execute(submit).await.unwrap();
    assert!(result.success);

    let rows = storage.projection_rows(None, "vendor_list").await.unwrap();
    assert_eq!(rows[0].legal_entity, LegalEntity::fallback());
}

#[tokio::test]
async fn updated_entity_is_reflected_in_the_projection() {
    let (storage, pipeline) = platform();

    let created = pipeline
        .execute(intent(
            "mdm.item.create",
            "acme",
            json!({ "name": "Widget", "sku": "X-1" }),
        ))
        .await
        .unwrap();
    let entity_id = created.event.unwrap().subject().unwrap().entity_id;

    let mut update = intent(
        "mdm.item.update",
        "acme",
        json!({ "name": "Widget Mk2", "sku": "X-1" }),
    );
    update.entity_id = Some(entity_id);
    let updated = pipeline.execute(update).await.unwrap();
    assert!(updated.success);

    let rows = storage.projection_rows(None, "item_catalog").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].pk, entity_id.to_string());
    assert_eq!(rows[0].data["name"], json!("Widget Mk2"));
    assert_eq!(rows[0].last_event_id, updated.event_id.unwrap());
}

#[tokio::test]
async fn unused_entity_id_hint_is_honored_on_create() {
    let (storage, pipeline) = platform();

    let hinted = EntityId::new();
    let mut submit = intent("mdm.vendor.create", "acme", json!({ "name": "Acme" }));
    submit.entity_id = Some(hinted);

    let result = pipeline.execute(submit).await.unwrap();
    assert_eq!(result.event.unwrap().subject().unwrap().entity_id, hinted);
    assert!(storage
        .entity_by_key(None, "vendor", hinted)
        .await
        .unwrap()
        .is_some());
}
