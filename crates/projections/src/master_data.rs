//! Master-data read models (`vendor_list`, `item_catalog`).
//!
//! Both projections share one shape: a row per entity keyed by its id,
//! holding the current attribute map. The handler is table-driven so new
//! master-data projections are a constructor away.

use async_trait::async_trait;
use chrono::Utc;

use keystone_core::{Event, MdmResult};
use keystone_store::{ProjectionRow, Storage};

use crate::engine::{ProjectionHandler, ProjectionTable};

/// Current-state listing of one master-data entity type.
pub struct MasterDataProjection {
    projection_type: String,
    table: String,
    event_types: Vec<String>,
}

impl MasterDataProjection {
    pub fn new(
        projection_type: impl Into<String>,
        table: impl Into<String>,
        event_types: Vec<String>,
    ) -> Self {
        Self {
            projection_type: projection_type.into(),
            table: table.into(),
            event_types,
        }
    }

    /// The vendor directory.
    pub fn vendor_list() -> Self {
        Self::new(
            "vendor_list",
            "vendor_list",
            vec![
                "mdm.vendor.created".to_string(),
                "mdm.vendor.updated".to_string(),
            ],
        )
    }

    /// The item catalog (SKU-bearing).
    pub fn item_catalog() -> Self {
        Self::new(
            "item_catalog",
            "item_catalog",
            vec![
                "mdm.item.created".to_string(),
                "mdm.item.updated".to_string(),
            ],
        )
    }

    pub fn table_config(&self) -> ProjectionTable {
        ProjectionTable {
            table_name: self.table.clone(),
            primary_key: "pk".to_string(),
        }
    }
}

#[async_trait]
impl<S: Storage> ProjectionHandler<S> for MasterDataProjection {
    fn projection_type(&self) -> &str {
        &self.projection_type
    }

    fn event_types(&self) -> &[String] {
        &self.event_types
    }

    async fn apply(&self, storage: &S, uow: &mut S::Uow, event: &Event) -> MdmResult<()> {
        let Some(subject) = event.subject() else {
            // Historical streams may carry mutating events without a subject
            // ref; replay tolerates them as no-ops.
            tracing::warn!(event_id = %event.id, "event has no subject ref, skipping");
            return Ok(());
        };

        let row = ProjectionRow {
            pk: subject.entity_id.to_string(),
            legal_entity: event.scope.legal_entity.clone(),
            last_event_id: event.id,
            data: event.data.clone(),
            updated_at: Utc::now(),
        };
        storage.upsert_projection_row(uow, &self.table, &row).await
    }

    async fn reset(&self, storage: &S, uow: &mut S::Uow) -> MdmResult<()> {
        storage.delete_projection_rows(uow, &self.table).await
    }
}
