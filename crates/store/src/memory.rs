//! In-memory storage driver.
//!
//! Intended for tests and dev mode; mirrors the Postgres backend's
//! transactional semantics without a database. A unit of work stages its
//! writes in an overlay (reads see committed state plus the overlay) and
//! `commit` applies everything atomically after re-validating the same
//! invariants the Postgres constraints enforce: unique idempotency keys,
//! unique entity primary keys, and version compare-and-swap.
//!
//! The sequence allocator is an atomic counter (the DB-sequence flavor):
//! rolled-back units of work leave gaps, which readers must treat as an
//! ordering artifact.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use keystone_core::{
    CorrelationId, Entity, EntityId, Event, EventId, IntentId, LegalEntity, MdmError, MdmResult,
    SnapshotId, StoredIntent,
};

use crate::driver::Storage;
use crate::types::{DeadLetter, ProjectionRow, RegisteredEventType, Snapshot, Subscription};

type EntityKey = (String, EntityId);

#[derive(Debug, Default)]
struct MemTables {
    /// Committed events, kept sorted by sequence.
    events: Vec<Event>,
    entities: HashMap<EntityKey, Entity>,
    event_types: HashMap<(String, i32), RegisteredEventType>,
    projection_tables: HashMap<String, BTreeMap<String, ProjectionRow>>,
    snapshots: Vec<Snapshot>,
    dead_letters: Vec<DeadLetter>,
    intents: HashMap<IntentId, StoredIntent>,
    subscriptions: HashMap<String, Subscription>,
}

#[derive(Debug)]
struct CasUpdate {
    entity_type: String,
    entity_id: EntityId,
    legal_entity: LegalEntity,
    attributes: JsonValue,
    expected_version: i64,
    updated_at: DateTime<Utc>,
}

#[derive(Debug)]
enum RowOp {
    Upsert(String, ProjectionRow),
    Truncate(String),
}

/// Staged overlay for one unit of work.
#[derive(Debug, Default)]
pub struct MemUnitOfWork {
    events: Vec<Event>,
    created_entities: Vec<Entity>,
    cas_updates: Vec<CasUpdate>,
    row_ops: Vec<RowOp>,
    snapshots: Vec<Snapshot>,
    dead_letters: Vec<DeadLetter>,
    intents: Vec<StoredIntent>,
    event_types: Vec<RegisteredEventType>,
    subscriptions: Vec<Subscription>,
}

/// In-memory storage driver. Not optimized for performance.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    tables: Arc<Mutex<MemTables>>,
    sequence: Arc<AtomicI64>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MdmResult<MutexGuard<'_, MemTables>> {
        self.tables
            .lock()
            .map_err(|_| MdmError::storage("lock", "storage mutex poisoned"))
    }
}

/// Committed entity plus the unit of work's staged creates and updates.
fn effective_entity(
    tables: &MemTables,
    uow: Option<&MemUnitOfWork>,
    key: &EntityKey,
) -> Option<Entity> {
    let mut entity = tables.entities.get(key).cloned();
    if let Some(uow) = uow {
        for created in &uow.created_entities {
            if created.entity_type == key.0 && created.entity_id == key.1 {
                entity = Some(created.clone());
            }
        }
        for cas in &uow.cas_updates {
            if cas.entity_type == key.0 && cas.entity_id == key.1 {
                if let Some(e) = entity.as_mut() {
                    if e.legal_entity == cas.legal_entity && e.version == cas.expected_version {
                        e.attributes = cas.attributes.clone();
                        e.version += 1;
                        e.updated_at = cas.updated_at;
                    }
                }
            }
        }
    }
    entity
}

fn effective_entities_of_type(
    tables: &MemTables,
    uow: Option<&MemUnitOfWork>,
    entity_type: &str,
) -> Vec<Entity> {
    let mut keys: Vec<EntityKey> = tables
        .entities
        .keys()
        .filter(|(t, _)| t == entity_type)
        .cloned()
        .collect();
    if let Some(uow) = uow {
        for created in &uow.created_entities {
            if created.entity_type == entity_type {
                keys.push((created.entity_type.clone(), created.entity_id));
            }
        }
    }
    keys.sort();
    keys.dedup();
    keys.iter()
        .filter_map(|key| effective_entity(tables, uow, key))
        .collect()
}

fn effective_rows(
    tables: &MemTables,
    uow: Option<&MemUnitOfWork>,
    table: &str,
) -> BTreeMap<String, ProjectionRow> {
    let mut rows = tables
        .projection_tables
        .get(table)
        .cloned()
        .unwrap_or_default();
    if let Some(uow) = uow {
        for op in &uow.row_ops {
            match op {
                RowOp::Truncate(t) if t == table => rows.clear(),
                RowOp::Upsert(t, row) if t == table => {
                    rows.insert(row.pk.clone(), row.clone());
                }
                _ => {}
            }
        }
    }
    rows
}

fn attribute_at<'a>(attributes: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = attributes;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[async_trait]
impl Storage for MemStorage {
    type Uow = MemUnitOfWork;

    async fn begin(&self) -> MdmResult<Self::Uow> {
        Ok(MemUnitOfWork::default())
    }

    async fn commit(&self, uow: Self::Uow) -> MdmResult<()> {
        let mut tables = self.lock()?;

        // Re-validate what the Postgres constraints would enforce.
        for event in &uow.events {
            if let Some(key) = &event.idempotency_key {
                if let Some(existing) = tables
                    .events
                    .iter()
                    .find(|e| e.idempotency_key.as_deref() == Some(key.as_str()))
                {
                    return Err(MdmError::IdempotencyConflict {
                        key: key.clone(),
                        existing_event_id: existing.id,
                    });
                }
            }
        }

        // Entities: validate and apply sequentially against a working copy so
        // a late failure leaves committed state untouched.
        let mut entities = tables.entities.clone();
        for created in &uow.created_entities {
            let key = (created.entity_type.clone(), created.entity_id);
            if entities.contains_key(&key) {
                return Err(MdmError::storage(
                    "unique_violation",
                    format!("entity {}/{} already exists", created.entity_type, created.entity_id),
                ));
            }
            entities.insert(key, created.clone());
        }
        for cas in &uow.cas_updates {
            let key = (cas.entity_type.clone(), cas.entity_id);
            match entities.get_mut(&key) {
                Some(e) if e.legal_entity == cas.legal_entity
                    && e.version == cas.expected_version =>
                {
                    e.attributes = cas.attributes.clone();
                    e.version += 1;
                    e.updated_at = cas.updated_at;
                }
                Some(e) => {
                    return Err(MdmError::conflict(cas.entity_id, cas.expected_version, e.version));
                }
                None => {
                    return Err(MdmError::not_found(cas.entity_type.clone(), cas.entity_id));
                }
            }
        }
        tables.entities = entities;

        tables.events.extend(uow.events);
        tables.events.sort_by_key(|e| e.sequence);

        for op in uow.row_ops {
            match op {
                RowOp::Truncate(table) => {
                    tables.projection_tables.entry(table).or_default().clear();
                }
                RowOp::Upsert(table, row) => {
                    tables
                        .projection_tables
                        .entry(table)
                        .or_default()
                        .insert(row.pk.clone(), row);
                }
            }
        }

        tables.snapshots.extend(uow.snapshots);
        tables.dead_letters.extend(uow.dead_letters);
        for intent in uow.intents {
            tables.intents.insert(intent.intent_id, intent);
        }
        for registered in uow.event_types {
            tables.event_types.insert(
                (registered.type_name.clone(), registered.schema_version),
                registered,
            );
        }
        for subscription in uow.subscriptions {
            tables
                .subscriptions
                .insert(subscription.subscriber_id.clone(), subscription);
        }

        Ok(())
    }

    async fn rollback(&self, _uow: Self::Uow) -> MdmResult<()> {
        // Staged overlay is dropped; any allocated sequence values stay
        // consumed, leaving a gap.
        Ok(())
    }

    async fn ping(&self) -> MdmResult<()> {
        self.lock().map(|_| ())
    }

    async fn next_sequence(&self, _uow: &mut Self::Uow) -> MdmResult<i64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert_event(&self, uow: &mut Self::Uow, event: &Event) -> MdmResult<()> {
        uow.events.push(event.clone());
        Ok(())
    }

    async fn event_by_idempotency_key(
        &self,
        uow: Option<&mut Self::Uow>,
        key: &str,
    ) -> MdmResult<Option<Event>> {
        let tables = self.lock()?;
        if let Some(found) = tables
            .events
            .iter()
            .find(|e| e.idempotency_key.as_deref() == Some(key))
        {
            return Ok(Some(found.clone()));
        }
        Ok(uow.and_then(|u| {
            u.events
                .iter()
                .find(|e| e.idempotency_key.as_deref() == Some(key))
                .cloned()
        }))
    }

    async fn event_by_id(&self, id: EventId) -> MdmResult<Option<Event>> {
        let tables = self.lock()?;
        Ok(tables.events.iter().find(|e| e.id == id).cloned())
    }

    async fn events_after(&self, after_sequence: i64, limit: i64) -> MdmResult<Vec<Event>> {
        let tables = self.lock()?;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.sequence > after_sequence)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn events_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> MdmResult<Vec<Event>> {
        let tables = self.lock()?;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.correlation_id == Some(correlation_id))
            .cloned()
            .collect())
    }

    async fn max_sequence(&self, uow: Option<&mut Self::Uow>) -> MdmResult<i64> {
        let tables = self.lock()?;
        let committed = tables.events.last().map(|e| e.sequence).unwrap_or(0);
        let staged = uow
            .and_then(|u| u.events.iter().map(|e| e.sequence).max())
            .unwrap_or(0);
        Ok(committed.max(staged))
    }

    async fn insert_entity(&self, uow: &mut Self::Uow, entity: &Entity) -> MdmResult<()> {
        let key = (entity.entity_type.clone(), entity.entity_id);
        let tables = self.lock()?;
        if effective_entity(&tables, Some(&*uow), &key).is_some() {
            return Err(MdmError::storage(
                "unique_violation",
                format!("entity {}/{} already exists", entity.entity_type, entity.entity_id),
            ));
        }
        drop(tables);
        uow.created_entities.push(entity.clone());
        Ok(())
    }

    async fn entity_by_key(
        &self,
        uow: Option<&mut Self::Uow>,
        entity_type: &str,
        entity_id: EntityId,
    ) -> MdmResult<Option<Entity>> {
        let tables = self.lock()?;
        let key = (entity_type.to_string(), entity_id);
        Ok(effective_entity(&tables, uow.map(|u| &*u), &key))
    }

    async fn entity_by_attribute(
        &self,
        uow: Option<&mut Self::Uow>,
        entity_type: &str,
        path: &str,
        value: &JsonValue,
        legal_entity: &LegalEntity,
    ) -> MdmResult<Option<Entity>> {
        let tables = self.lock()?;
        let mut candidates: Vec<Entity> =
            effective_entities_of_type(&tables, uow.map(|u| &*u), entity_type)
                .into_iter()
                .filter(|e| &e.legal_entity == legal_entity)
                .filter(|e| attribute_at(&e.attributes, path) == Some(value))
                .collect();
        candidates.sort_by_key(|e| e.created_at);
        Ok(candidates.into_iter().next())
    }

    async fn update_entity_cas(
        &self,
        uow: &mut Self::Uow,
        entity_type: &str,
        entity_id: EntityId,
        legal_entity: &LegalEntity,
        attributes: &JsonValue,
        expected_version: i64,
        updated_at: DateTime<Utc>,
    ) -> MdmResult<u64> {
        let key = (entity_type.to_string(), entity_id);
        let tables = self.lock()?;
        let matches = effective_entity(&tables, Some(&*uow), &key)
            .map(|e| &e.legal_entity == legal_entity && e.version == expected_version)
            .unwrap_or(false);
        drop(tables);

        if !matches {
            return Ok(0);
        }

        uow.cas_updates.push(CasUpdate {
            entity_type: entity_type.to_string(),
            entity_id,
            legal_entity: legal_entity.clone(),
            attributes: attributes.clone(),
            expected_version,
            updated_at,
        });
        Ok(1)
    }

    async fn entities_by_type(
        &self,
        entity_type: &str,
        legal_entity: Option<&LegalEntity>,
    ) -> MdmResult<Vec<Entity>> {
        let tables = self.lock()?;
        let mut entities: Vec<Entity> = effective_entities_of_type(&tables, None, entity_type)
            .into_iter()
            .filter(|e| legal_entity.is_none_or(|le| &e.legal_entity == le))
            .collect();
        entities.sort_by_key(|e| e.created_at);
        Ok(entities)
    }

    async fn upsert_event_type(
        &self,
        uow: &mut Self::Uow,
        registered: &RegisteredEventType,
    ) -> MdmResult<()> {
        uow.event_types.push(registered.clone());
        Ok(())
    }

    async fn event_type(
        &self,
        type_name: &str,
        schema_version: i32,
    ) -> MdmResult<Option<RegisteredEventType>> {
        let tables = self.lock()?;
        Ok(tables
            .event_types
            .get(&(type_name.to_string(), schema_version))
            .cloned())
    }

    async fn event_types(&self) -> MdmResult<Vec<RegisteredEventType>> {
        let tables = self.lock()?;
        let mut all: Vec<RegisteredEventType> = tables.event_types.values().cloned().collect();
        all.sort_by(|a, b| {
            (a.type_name.as_str(), a.schema_version).cmp(&(b.type_name.as_str(), b.schema_version))
        });
        Ok(all)
    }

    async fn upsert_projection_row(
        &self,
        uow: &mut Self::Uow,
        table: &str,
        row: &ProjectionRow,
    ) -> MdmResult<()> {
        uow.row_ops.push(RowOp::Upsert(table.to_string(), row.clone()));
        Ok(())
    }

    async fn delete_projection_rows(&self, uow: &mut Self::Uow, table: &str) -> MdmResult<()> {
        uow.row_ops.push(RowOp::Truncate(table.to_string()));
        Ok(())
    }

    async fn projection_rows(
        &self,
        uow: Option<&mut Self::Uow>,
        table: &str,
    ) -> MdmResult<Vec<ProjectionRow>> {
        let tables = self.lock()?;
        Ok(effective_rows(&tables, uow.map(|u| &*u), table)
            .into_values()
            .collect())
    }

    async fn insert_snapshot(&self, uow: &mut Self::Uow, snapshot: &Snapshot) -> MdmResult<()> {
        uow.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn snapshot_by_id(&self, snapshot_id: SnapshotId) -> MdmResult<Option<Snapshot>> {
        let tables = self.lock()?;
        Ok(tables
            .snapshots
            .iter()
            .find(|s| s.snapshot_id == snapshot_id)
            .cloned())
    }

    async fn snapshots_by_type(&self, projection_type: &str) -> MdmResult<Vec<Snapshot>> {
        let tables = self.lock()?;
        let mut snapshots: Vec<Snapshot> = tables
            .snapshots
            .iter()
            .filter(|s| s.projection_type == projection_type)
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshots)
    }

    async fn insert_dead_letter(&self, uow: &mut Self::Uow, entry: &DeadLetter) -> MdmResult<()> {
        uow.dead_letters.push(entry.clone());
        Ok(())
    }

    async fn dead_letters(&self, projection_type: &str) -> MdmResult<Vec<DeadLetter>> {
        let tables = self.lock()?;
        Ok(tables
            .dead_letters
            .iter()
            .filter(|d| d.projection_type == projection_type)
            .cloned()
            .collect())
    }

    async fn insert_intent(&self, uow: &mut Self::Uow, intent: &StoredIntent) -> MdmResult<()> {
        uow.intents.push(intent.clone());
        Ok(())
    }

    async fn intent_by_id(&self, intent_id: IntentId) -> MdmResult<Option<StoredIntent>> {
        let tables = self.lock()?;
        Ok(tables.intents.get(&intent_id).cloned())
    }

    async fn upsert_subscription(
        &self,
        uow: &mut Self::Uow,
        subscription: &Subscription,
    ) -> MdmResult<()> {
        uow.subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn subscription(&self, subscriber_id: &str) -> MdmResult<Option<Subscription>> {
        let tables = self.lock()?;
        Ok(tables.subscriptions.get(subscriber_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keystone_core::{Actor, Scope, TenantId};
    use serde_json::json;

    fn test_event(sequence: i64, idempotency_key: Option<&str>) -> Event {
        Event {
            id: EventId::new(),
            sequence,
            event_type: "mdm.vendor.created".to_string(),
            schema_version: 1,
            occurred_at: Utc::now(),
            recorded_at: Utc::now(),
            effective_date: None,
            scope: Scope::new(TenantId::default(), LegalEntity::new("acme")),
            actor: Actor::system("test"),
            intent_id: None,
            correlation_id: None,
            caused_by: None,
            data: json!({}),
            entities: vec![],
            rules_evaluated: vec![],
            idempotency_key: idempotency_key.map(String::from),
        }
    }

    fn test_entity(entity_id: EntityId, version: i64) -> Entity {
        Entity {
            entity_type: "vendor".to_string(),
            entity_id,
            legal_entity: LegalEntity::new("acme"),
            attributes: json!({ "name": "Acme" }),
            version,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let storage = MemStorage::new();
        let mut uow = storage.begin().await.unwrap();
        let seq = storage.next_sequence(&mut uow).await.unwrap();
        let event = test_event(seq, None);
        storage.insert_event(&mut uow, &event).await.unwrap();

        assert!(storage.event_by_id(event.id).await.unwrap().is_none());
        storage.commit(uow).await.unwrap();
        assert!(storage.event_by_id(event.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rollback_discards_writes_and_leaves_a_sequence_gap() {
        let storage = MemStorage::new();

        let mut uow = storage.begin().await.unwrap();
        let seq = storage.next_sequence(&mut uow).await.unwrap();
        let event = test_event(seq, None);
        storage.insert_event(&mut uow, &event).await.unwrap();
        storage.rollback(uow).await.unwrap();

        assert!(storage.event_by_id(event.id).await.unwrap().is_none());

        // The consumed value is gone; the next append observes a gap.
        let mut uow = storage.begin().await.unwrap();
        let next = storage.next_sequence(&mut uow).await.unwrap();
        assert_eq!(next, seq + 1);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected_at_commit() {
        let storage = MemStorage::new();

        let mut uow = storage.begin().await.unwrap();
        let seq = storage.next_sequence(&mut uow).await.unwrap();
        let first = test_event(seq, Some("k-1"));
        storage.insert_event(&mut uow, &first).await.unwrap();
        storage.commit(uow).await.unwrap();

        let mut uow = storage.begin().await.unwrap();
        let seq = storage.next_sequence(&mut uow).await.unwrap();
        storage
            .insert_event(&mut uow, &test_event(seq, Some("k-1")))
            .await
            .unwrap();
        let err = storage.commit(uow).await.unwrap_err();
        match err {
            MdmError::IdempotencyConflict { key, existing_event_id } => {
                assert_eq!(key, "k-1");
                assert_eq!(existing_event_id, first.id);
            }
            other => panic!("expected IdempotencyConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cas_update_applies_and_conflicts_on_stale_version() {
        let storage = MemStorage::new();
        let entity_id = EntityId::new();
        let legal = LegalEntity::new("acme");

        let mut uow = storage.begin().await.unwrap();
        storage
            .insert_entity(&mut uow, &test_entity(entity_id, 1))
            .await
            .unwrap();
        storage.commit(uow).await.unwrap();

        // Two units of work race from the same baseline.
        let mut a = storage.begin().await.unwrap();
        let mut b = storage.begin().await.unwrap();
        let affected = storage
            .update_entity_cas(&mut a, "vendor", entity_id, &legal, &json!({"name": "A"}), 1, Utc::now())
            .await
            .unwrap();
        assert_eq!(affected, 1);
        let affected = storage
            .update_entity_cas(&mut b, "vendor", entity_id, &legal, &json!({"name": "B"}), 1, Utc::now())
            .await
            .unwrap();
        assert_eq!(affected, 1);

        storage.commit(a).await.unwrap();
        let err = storage.commit(b).await.unwrap_err();
        match err {
            MdmError::ConcurrencyConflict { expected, actual, .. } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }

        let committed = storage
            .entity_by_key(None, "vendor", entity_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(committed.version, 2);
        assert_eq!(committed.attributes, json!({"name": "A"}));
    }

    #[tokio::test]
    async fn uow_reads_its_own_staged_entity_state() {
        let storage = MemStorage::new();
        let entity_id = EntityId::new();
        let legal = LegalEntity::new("acme");

        let mut uow = storage.begin().await.unwrap();
        storage
            .insert_entity(&mut uow, &test_entity(entity_id, 1))
            .await
            .unwrap();
        storage
            .update_entity_cas(&mut uow, "vendor", entity_id, &legal, &json!({"name": "B"}), 1, Utc::now())
            .await
            .unwrap();

        let seen = storage
            .entity_by_key(Some(&mut uow), "vendor", entity_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.version, 2);
        assert_eq!(seen.attributes, json!({"name": "B"}));

        // Not committed yet.
        assert!(storage
            .entity_by_key(None, "vendor", entity_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn truncate_then_upsert_order_is_preserved() {
        let storage = MemStorage::new();
        let row = ProjectionRow {
            pk: "v-1".to_string(),
            legal_entity: LegalEntity::new("acme"),
            last_event_id: EventId::new(),
            data: json!({"name": "Acme"}),
            updated_at: Utc::now(),
        };

        let mut uow = storage.begin().await.unwrap();
        storage
            .upsert_projection_row(&mut uow, "vendor_list", &row)
            .await
            .unwrap();
        storage.commit(uow).await.unwrap();

        let mut uow = storage.begin().await.unwrap();
        storage
            .delete_projection_rows(&mut uow, "vendor_list")
            .await
            .unwrap();
        let replacement = ProjectionRow {
            pk: "v-2".to_string(),
            ..row.clone()
        };
        storage
            .upsert_projection_row(&mut uow, "vendor_list", &replacement)
            .await
            .unwrap();
        storage.commit(uow).await.unwrap();

        let rows = storage.projection_rows(None, "vendor_list").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pk, "v-2");
    }
}
