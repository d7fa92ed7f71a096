//! Point-in-time projection snapshots.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use keystone_core::{MdmError, MdmResult, SnapshotId};
use keystone_store::{Snapshot, Storage};

use crate::engine::ProjectionEngine;

/// Captures and restores whole projection tables. Restore truncates the live
/// table and reinserts the snapshot's rows inside one unit of work.
pub struct SnapshotService<S: Storage> {
    storage: Arc<S>,
    engine: Arc<ProjectionEngine<S>>,
}

impl<S: Storage> SnapshotService<S> {
    pub fn new(storage: Arc<S>, engine: Arc<ProjectionEngine<S>>) -> Self {
        Self { storage, engine }
    }

    fn table_for(&self, projection_type: &str) -> MdmResult<String> {
        self.engine
            .table(projection_type)
            .map(|t| t.table_name.clone())
            .ok_or_else(|| {
                MdmError::validation_field(
                    "projection_type",
                    format!("no table registered for projection type '{projection_type}'"),
                )
            })
    }

    /// Capture all rows of the projection's table and the highest applied
    /// sequence, consistently within one unit of work.
    #[instrument(skip(self), err)]
    pub async fn create_snapshot(&self, projection_type: &str) -> MdmResult<Snapshot> {
        let table = self.table_for(projection_type)?;

        let mut uow = self.storage.begin().await?;
        let rows = self.storage.projection_rows(Some(&mut uow), &table).await?;
        let sequence_number = self.storage.max_sequence(Some(&mut uow)).await?;

        let snapshot = Snapshot {
            snapshot_id: SnapshotId::new(),
            projection_type: projection_type.to_string(),
            sequence_number,
            is_stale: false,
            created_at: Utc::now(),
            blob: rows,
        };
        self.storage.insert_snapshot(&mut uow, &snapshot).await?;
        self.storage.commit(uow).await?;

        tracing::info!(projection_type, sequence_number, rows = snapshot.blob.len(), "snapshot created");
        Ok(snapshot)
    }

    /// Replace the live table with a snapshot's rows. Only snapshots of the
    /// same projection type are accepted.
    #[instrument(skip(self), err)]
    pub async fn restore_from_snapshot(
        &self,
        projection_type: &str,
        snapshot_id: SnapshotId,
    ) -> MdmResult<()> {
        let table = self.table_for(projection_type)?;

        let snapshot = self
            .storage
            .snapshot_by_id(snapshot_id)
            .await?
            .ok_or_else(|| MdmError::not_found("snapshot", snapshot_id))?;
        if snapshot.projection_type != projection_type {
            return Err(MdmError::validation_field(
                "snapshot_id",
                format!(
                    "snapshot belongs to projection type '{}', not '{projection_type}'",
                    snapshot.projection_type
                ),
            ));
        }

        let mut uow = self.storage.begin().await?;
        self.storage.delete_projection_rows(&mut uow, &table).await?;
        for row in &snapshot.blob {
            self.storage.upsert_projection_row(&mut uow, &table, row).await?;
        }
        self.storage.commit(uow).await
    }

    /// Snapshots for one projection type, newest first; every snapshot but
    /// the newest is stale.
    pub async fn list_snapshots(&self, projection_type: &str) -> MdmResult<Vec<Snapshot>> {
        let mut snapshots = self.storage.snapshots_by_type(projection_type).await?;
        for (index, snapshot) in snapshots.iter_mut().enumerate() {
            snapshot.is_stale = index > 0;
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master_data::MasterDataProjection;
    use keystone_core::{Actor, EntityId, EntityRef, Event, EventId, LegalEntity, Scope, TenantId};
    use keystone_store::MemStorage;
    use serde_json::json;

    fn fixture() -> (Arc<MemStorage>, Arc<ProjectionEngine<MemStorage>>, SnapshotService<MemStorage>) {
        let storage = Arc::new(MemStorage::new());
        let mut engine = ProjectionEngine::new(storage.clone());
        let vendor_list = MasterDataProjection::vendor_list();
        engine.register_table("vendor_list", vendor_list.table_config());
        engine.register_handler(Arc::new(vendor_list));
        let item_catalog = MasterDataProjection::item_catalog();
        engine.register_table("item_catalog", item_catalog.table_config());
        engine.register_handler(Arc::new(item_catalog));
        let engine = Arc::new(engine);
        let service = SnapshotService::new(storage.clone(), engine.clone());
        (storage, engine, service)
    }

    async fn seed_vendor(storage: &Arc<MemStorage>, engine: &ProjectionEngine<MemStorage>, sequence: i64, name: &str) {
        let event = Event {
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
            data: json!({ "name": name }),
            entities: vec![EntityRef::subject("vendor", EntityId::new())],
            rules_evaluated: vec![],
            idempotency_key: None,
        };
        let mut uow = storage.begin().await.unwrap();
        storage.insert_event(&mut uow, &event).await.unwrap();
        engine.process_event(&mut uow, &event).await.unwrap();
        storage.commit(uow).await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_restore_round_trip_is_a_no_op() {
        let (storage, engine, service) = fixture();
        seed_vendor(&storage, &engine, 1, "Acme").await;
        seed_vendor(&storage, &engine, 2, "Globex").await;

        let before = storage.projection_rows(None, "vendor_list").await.unwrap();
        let snapshot = service.create_snapshot("vendor_list").await.unwrap();
        assert_eq!(snapshot.sequence_number, 2);
        assert_eq!(snapshot.blob.len(), 2);

        service
            .restore_from_snapshot("vendor_list", snapshot.snapshot_id)
            .await
            .unwrap();

        let after = storage.projection_rows(None, "vendor_list").await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn restore_replaces_diverged_rows() {
        let (storage, engine, service) = fixture();
        seed_vendor(&storage, &engine, 1, "Acme").await;

        let snapshot = service.create_snapshot("vendor_list").await.unwrap();
        seed_vendor(&storage, &engine, 2, "Globex").await;
        assert_eq!(storage.projection_rows(None, "vendor_list").await.unwrap().len(), 2);

        service
            .restore_from_snapshot("vendor_list", snapshot.snapshot_id)
            .await
            .unwrap();
        let rows = storage.projection_rows(None, "vendor_list").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data["name"], json!("Acme"));
    }

    #[tokio::test]
    async fn only_the_newest_snapshot_is_fresh() {
        let (storage, engine, service) = fixture();
        seed_vendor(&storage, &engine, 1, "Acme").await;

        let first = service.create_snapshot("vendor_list").await.unwrap();
        let second = service.create_snapshot("vendor_list").await.unwrap();

        let listed = service.list_snapshots("vendor_list").await.unwrap();
        assert_eq!(listed.len(), 2);
        let newest = listed.iter().find(|s| s.snapshot_id == second.snapshot_id).unwrap();
        let oldest = listed.iter().find(|s| s.snapshot_id == first.snapshot_id).unwrap();
        assert!(!newest.is_stale);
        assert!(oldest.is_stale);
    }

    #[tokio::test]
    async fn restore_rejects_foreign_projection_type() {
        let (storage, engine, service) = fixture();
        seed_vendor(&storage, &engine, 1, "Acme").await;
        let snapshot = service.create_snapshot("vendor_list").await.unwrap();

        // A second projection sharing the engine.
        let err = service
            .restore_from_snapshot("item_catalog", snapshot.snapshot_id)
            .await
            .unwrap_err();
        assert!(matches!(err, MdmError::Validation { .. }));
    }
}
