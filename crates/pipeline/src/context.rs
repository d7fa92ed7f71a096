//! Evaluation context for one intent turn.

use serde_json::{json, Value as JsonValue};

use keystone_core::{Entity, Intent, LegalEntity, Scope, TenantId};

/// Resolve the legal-entity scope for an intent.
///
/// An actor with an explicit legal entity always wins; the `"default"`
/// fallback exists only for tenant-less system intents.
pub fn resolve_scope(intent: &Intent) -> Scope {
    let legal_entity = intent
        .actor
        .legal_entity
        .clone()
        .unwrap_or_else(LegalEntity::fallback);
    Scope::new(TenantId::default(), legal_entity)
}

/// Whether the payload is missing a usable `name`.
pub fn name_missing(data: &JsonValue) -> bool {
    match data.get("name") {
        Some(JsonValue::String(s)) => s.trim().is_empty(),
        _ => true,
    }
}

/// Assemble the JSON context the rules evaluate against: the intent payload,
/// the acting identity, and the derived flags computed by the handler's
/// preconditions.
pub fn build_context(
    intent: &Intent,
    scope: &Scope,
    current: Option<&Entity>,
    duplicate_flag: Option<(&str, bool)>,
) -> JsonValue {
    let mut context = json!({
        "intent_type": intent.intent_type,
        "data": intent.data,
        "actor": {
            "sub": intent.actor.sub,
            "name": intent.actor.name,
            "actor_type": intent.actor.actor_type,
            "capabilities": intent.actor.capabilities,
        },
        "legal_entity": scope.legal_entity.as_str(),
        "_name_missing": name_missing(&intent.data),
    });

    if let Some(obj) = context.as_object_mut() {
        if let Some((attribute, exists)) = duplicate_flag {
            obj.insert(format!("_{attribute}_duplicate_exists"), json!(exists));
        }
        if let Some(entity) = current {
            obj.insert("entity".to_string(), entity.attributes.clone());
            obj.insert("entity_version".to_string(), json!(entity.version));
        }
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::{Actor, ActorType};

    fn intent_with_actor(legal_entity: Option<&str>) -> Intent {
        Intent {
            intent_type: "mdm.vendor.create".to_string(),
            actor: Actor {
                sub: "u-1".to_string(),
                name: "Pat".to_string(),
                actor_type: ActorType::Human,
                legal_entity: legal_entity.map(LegalEntity::new),
                capabilities: vec!["mdm.vendor.create".to_string()],
            },
            data: json!({ "name": "Acme" }),
            entity_id: None,
            expected_entity_version: None,
            idempotency_key: None,
            correlation_id: None,
            occurred_at: None,
            effective_date: None,
        }
    }

    #[test]
    fn actor_scope_wins_over_fallback() {
        let scope = resolve_scope(&intent_with_actor(Some("acme")));
        assert_eq!(scope.legal_entity, LegalEntity::new("acme"));

        let scope = resolve_scope(&intent_with_actor(None));
        assert_eq!(scope.legal_entity, LegalEntity::fallback());
    }

    #[test]
    fn name_missing_covers_absent_blank_and_non_string() {
        assert!(name_missing(&json!({})));
        assert!(name_missing(&json!({ "name": "  " })));
        assert!(name_missing(&json!({ "name": 42 })));
        assert!(!name_missing(&json!({ "name": "Acme" })));
    }

    #[test]
    fn derived_flags_land_beside_intent_data() {
        let intent = intent_with_actor(Some("acme"));
        let scope = resolve_scope(&intent);
        let context = build_context(&intent, &scope, None, Some(("sku", true)));

        assert_eq!(context["intent_type"], json!("mdm.vendor.create"));
        assert_eq!(context["_name_missing"], json!(false));
        assert_eq!(context["_sku_duplicate_exists"], json!(true));
        assert_eq!(context["data"]["name"], json!("Acme"));
        assert!(context.get("entity").is_none());
    }
}
