//! Versioned, legal-entity-scoped current-state entities.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::instrument;

use keystone_core::{Entity, EntityId, LegalEntity, MdmError, MdmResult};

use crate::driver::Storage;

/// CRUD over the entity graph. All operations take an optional unit of work;
/// reads without one see committed state.
pub struct EntityGraph<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> EntityGraph<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Create a row at version 1.
    #[instrument(skip(self, uow, attributes), err)]
    pub async fn create(
        &self,
        uow: &mut S::Uow,
        entity_type: &str,
        entity_id: EntityId,
        attributes: JsonValue,
        legal_entity: LegalEntity,
    ) -> MdmResult<Entity> {
        let now = Utc::now();
        let entity = Entity {
            entity_type: entity_type.to_string(),
            entity_id,
            legal_entity,
            attributes,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.storage.insert_entity(uow, &entity).await?;
        Ok(entity)
    }

    /// Scoped lookup. A row under a different legal entity reads as
    /// not-found, never as forbidden.
    pub async fn get(
        &self,
        uow: Option<&mut S::Uow>,
        entity_type: &str,
        entity_id: EntityId,
        legal_entity: Option<&LegalEntity>,
    ) -> MdmResult<Option<Entity>> {
        let entity = self.storage.entity_by_key(uow, entity_type, entity_id).await?;
        Ok(entity.filter(|e| legal_entity.is_none_or(|le| &e.legal_entity == le)))
    }

    /// Uniqueness probe: first row whose attribute at `json_path` equals
    /// `value` within the scope.
    pub async fn get_by_attribute(
        &self,
        uow: Option<&mut S::Uow>,
        entity_type: &str,
        json_path: &str,
        value: &JsonValue,
        legal_entity: &LegalEntity,
    ) -> MdmResult<Option<Entity>> {
        self.storage
            .entity_by_attribute(uow, entity_type, json_path, value, legal_entity)
            .await
    }

    /// Compare-and-swap update on `(entity_type, entity_id, version)` within
    /// the scope. Zero affected rows is disambiguated with a follow-up read:
    /// version moved → concurrency conflict; missing or out of scope →
    /// not found.
    #[instrument(skip(self, uow, new_attributes), err)]
    pub async fn update(
        &self,
        uow: &mut S::Uow,
        entity_type: &str,
        entity_id: EntityId,
        new_attributes: JsonValue,
        expected_version: i64,
        legal_entity: &LegalEntity,
    ) -> MdmResult<Entity> {
        let updated_at = Utc::now();
        let affected = self
            .storage
            .update_entity_cas(
                uow,
                entity_type,
                entity_id,
                legal_entity,
                &new_attributes,
                expected_version,
                updated_at,
            )
            .await?;

        if affected == 0 {
            let current = self
                .storage
                .entity_by_key(Some(uow), entity_type, entity_id)
                .await?;
            return match current {
                Some(entity) if entity.legal_entity == *legal_entity => Err(MdmError::conflict(
                    entity_id,
                    expected_version,
                    entity.version,
                )),
                _ => Err(MdmError::not_found(entity_type, entity_id)),
            };
        }

        self.storage
            .entity_by_key(Some(uow), entity_type, entity_id)
            .await?
            .ok_or_else(|| MdmError::not_found(entity_type, entity_id))
    }

    /// All entities of one type, ordered by creation time.
    pub async fn find_by_type(
        &self,
        entity_type: &str,
        legal_entity: Option<&LegalEntity>,
    ) -> MdmResult<Vec<Entity>> {
        self.storage.entities_by_type(entity_type, legal_entity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemStorage;
    use serde_json::json;

    fn fixture() -> (Arc<MemStorage>, EntityGraph<MemStorage>) {
        let storage = Arc::new(MemStorage::new());
        (storage.clone(), EntityGraph::new(storage))
    }

    async fn create_vendor(
        storage: &Arc<MemStorage>,
        graph: &EntityGraph<MemStorage>,
        legal_entity: &str,
        name: &str,
    ) -> EntityId {
        let entity_id = EntityId::new();
        let mut uow = storage.begin().await.unwrap();
        graph
            .create(
                &mut uow,
                "vendor",
                entity_id,
                json!({ "name": name }),
                LegalEntity::new(legal_entity),
            )
            .await
            .unwrap();
        storage.commit(uow).await.unwrap();
        entity_id
    }

    #[tokio::test]
    async fn create_starts_at_version_one() {
        let (storage, graph) = fixture();
        let id = create_vendor(&storage, &graph, "acme", "Acme").await;

        let entity = graph.get(None, "vendor", id, None).await.unwrap().unwrap();
        assert_eq!(entity.version, 1);
        assert_eq!(entity.attributes["name"], json!("Acme"));
    }

    #[tokio::test]
    async fn wrong_scope_reads_as_not_found() {
        let (storage, graph) = fixture();
        let id = create_vendor(&storage, &graph, "acme", "Acme").await;

        let other = LegalEntity::new("globex");
        assert!(graph
            .get(None, "vendor", id, Some(&other))
            .await
            .unwrap()
            .is_none());

        let own = LegalEntity::new("acme");
        assert!(graph
            .get(None, "vendor", id, Some(&own))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn update_increments_version_by_exactly_one() {
        let (storage, graph) = fixture();
        let id = create_vendor(&storage, &graph, "acme", "Acme").await;
        let legal = LegalEntity::new("acme");

        let mut uow = storage.begin().await.unwrap();
        let updated = graph
            .update(&mut uow, "vendor", id, json!({ "name": "Acme Corp" }), 1, &legal)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        storage.commit(uow).await.unwrap();

        let committed = graph.get(None, "vendor", id, None).await.unwrap().unwrap();
        assert_eq!(committed.version, 2);
    }

    #[tokio::test]
    async fn stale_version_update_is_a_concurrency_conflict() {
        let (storage, graph) = fixture();
        let id = create_vendor(&storage, &graph, "acme", "Acme").await;
        let legal = LegalEntity::new("acme");

        let mut uow = storage.begin().await.unwrap();
        graph
            .update(&mut uow, "vendor", id, json!({ "name": "v2" }), 1, &legal)
            .await
            .unwrap();
        storage.commit(uow).await.unwrap();

        let mut uow = storage.begin().await.unwrap();
        let err = graph
            .update(&mut uow, "vendor", id, json!({ "name": "stale" }), 1, &legal)
            .await
            .unwrap_err();
        match err {
            MdmError::ConcurrencyConflict { expected, actual, .. } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_out_of_scope_is_not_found() {
        let (storage, graph) = fixture();
        let id = create_vendor(&storage, &graph, "acme", "Acme").await;

        let mut uow = storage.begin().await.unwrap();
        let err = graph
            .update(
                &mut uow,
                "vendor",
                id,
                json!({ "name": "x" }),
                1,
                &LegalEntity::new("globex"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MdmError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn attribute_probe_finds_first_match_in_scope() {
        let (storage, graph) = fixture();
        create_vendor(&storage, &graph, "acme", "Acme").await;
        create_vendor(&storage, &graph, "globex", "Acme").await;

        let found = graph
            .get_by_attribute(None, "vendor", "name", &json!("Acme"), &LegalEntity::new("acme"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.legal_entity, LegalEntity::new("acme"));

        assert!(graph
            .get_by_attribute(None, "vendor", "name", &json!("Other"), &LegalEntity::new("acme"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn find_by_type_is_ordered_and_scoped() {
        let (storage, graph) = fixture();
        create_vendor(&storage, &graph, "acme", "First").await;
        create_vendor(&storage, &graph, "acme", "Second").await;
        create_vendor(&storage, &graph, "globex", "Elsewhere").await;

        let acme = LegalEntity::new("acme");
        let vendors = graph.find_by_type("vendor", Some(&acme)).await.unwrap();
        assert_eq!(vendors.len(), 2);
        assert_eq!(vendors[0].attributes["name"], json!("First"));
        assert_eq!(vendors[1].attributes["name"], json!("Second"));

        let all = graph.find_by_type("vendor", None).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
