//! Driver abstraction: a connection pool plus transactional units of work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use keystone_core::{
    CorrelationId, Entity, EntityId, Event, EventId, IntentId, LegalEntity, MdmResult,
    SnapshotId, StoredIntent,
};

use crate::types::{DeadLetter, ProjectionRow, RegisteredEventType, Snapshot, Subscription};

/// Raw persistence operations behind the platform services.
///
/// A `Uow` is one ACID scope bound to a single connection: everything staged
/// through it becomes visible atomically at `commit` and disappears on
/// `rollback`. Mutating operations require a unit of work; read operations
/// accept an optional one, reading committed state when none is given.
///
/// Implementations enforce the cross-transaction exclusions the data model
/// relies on: unique `events.sequence`, unique `events.idempotency_key`,
/// primary key `(entity_type, entity_id)` and unique
/// `(type_name, schema_version)` in the registry.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    type Uow: Send;

    async fn begin(&self) -> MdmResult<Self::Uow>;
    async fn commit(&self, uow: Self::Uow) -> MdmResult<()>;
    async fn rollback(&self, uow: Self::Uow) -> MdmResult<()>;

    /// Cheap connectivity check for health reporting.
    async fn ping(&self) -> MdmResult<()>;

    // ── events ──────────────────────────────────────────────────────────

    /// Take the next value from the serialized sequence allocator.
    async fn next_sequence(&self, uow: &mut Self::Uow) -> MdmResult<i64>;

    async fn insert_event(&self, uow: &mut Self::Uow, event: &Event) -> MdmResult<()>;

    async fn event_by_idempotency_key(
        &self,
        uow: Option<&mut Self::Uow>,
        key: &str,
    ) -> MdmResult<Option<Event>>;

    async fn event_by_id(&self, id: EventId) -> MdmResult<Option<Event>>;

    /// Events with `sequence > after_sequence`, ascending, at most `limit`.
    async fn events_after(&self, after_sequence: i64, limit: i64) -> MdmResult<Vec<Event>>;

    async fn events_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> MdmResult<Vec<Event>>;

    /// Highest committed sequence (0 when the log is empty).
    async fn max_sequence(&self, uow: Option<&mut Self::Uow>) -> MdmResult<i64>;

    // ── entity graph ────────────────────────────────────────────────────

    async fn insert_entity(&self, uow: &mut Self::Uow, entity: &Entity) -> MdmResult<()>;

    /// Unscoped lookup by primary key; legal-entity scoping is applied by the
    /// entity-graph service.
    async fn entity_by_key(
        &self,
        uow: Option<&mut Self::Uow>,
        entity_type: &str,
        entity_id: EntityId,
    ) -> MdmResult<Option<Entity>>;

    /// First row (by `created_at`) whose attribute at `path` equals `value`
    /// within the given scope.
    async fn entity_by_attribute(
        &self,
        uow: Option<&mut Self::Uow>,
        entity_type: &str,
        path: &str,
        value: &JsonValue,
        legal_entity: &LegalEntity,
    ) -> MdmResult<Option<Entity>>;

    /// Compare-and-swap update; returns affected row count (0 or 1).
    #[allow(clippy::too_many_arguments)]
    async fn update_entity_cas(
        &self,
        uow: &mut Self::Uow,
        entity_type: &str,
        entity_id: EntityId,
        legal_entity: &LegalEntity,
        attributes: &JsonValue,
        expected_version: i64,
        updated_at: DateTime<Utc>,
    ) -> MdmResult<u64>;

    async fn entities_by_type(
        &self,
        entity_type: &str,
        legal_entity: Option<&LegalEntity>,
    ) -> MdmResult<Vec<Entity>>;

    // ── event-type registry ─────────────────────────────────────────────

    async fn upsert_event_type(
        &self,
        uow: &mut Self::Uow,
        registered: &RegisteredEventType,
    ) -> MdmResult<()>;

    async fn event_type(
        &self,
        type_name: &str,
        schema_version: i32,
    ) -> MdmResult<Option<RegisteredEventType>>;

    async fn event_types(&self) -> MdmResult<Vec<RegisteredEventType>>;

    // ── projection rows ─────────────────────────────────────────────────
    //
    // Table names come from the process-wide projection-table registry,
    // never from request input.

    async fn upsert_projection_row(
        &self,
        uow: &mut Self::Uow,
        table: &str,
        row: &ProjectionRow,
    ) -> MdmResult<()>;

    async fn delete_projection_rows(&self, uow: &mut Self::Uow, table: &str) -> MdmResult<()>;

    async fn projection_rows(
        &self,
        uow: Option<&mut Self::Uow>,
        table: &str,
    ) -> MdmResult<Vec<ProjectionRow>>;

    // ── snapshots ───────────────────────────────────────────────────────

    async fn insert_snapshot(&self, uow: &mut Self::Uow, snapshot: &Snapshot) -> MdmResult<()>;

    async fn snapshot_by_id(&self, snapshot_id: SnapshotId) -> MdmResult<Option<Snapshot>>;

    /// Snapshots for one projection type, newest first.
    async fn snapshots_by_type(&self, projection_type: &str) -> MdmResult<Vec<Snapshot>>;

    // ── dead letters ────────────────────────────────────────────────────

    async fn insert_dead_letter(&self, uow: &mut Self::Uow, entry: &DeadLetter) -> MdmResult<()>;

    async fn dead_letters(&self, projection_type: &str) -> MdmResult<Vec<DeadLetter>>;

    // ── stored intents ──────────────────────────────────────────────────

    async fn insert_intent(&self, uow: &mut Self::Uow, intent: &StoredIntent) -> MdmResult<()>;

    async fn intent_by_id(&self, intent_id: IntentId) -> MdmResult<Option<StoredIntent>>;

    // ── subscriptions ───────────────────────────────────────────────────

    async fn upsert_subscription(
        &self,
        uow: &mut Self::Uow,
        subscription: &Subscription,
    ) -> MdmResult<()>;

    async fn subscription(&self, subscriber_id: &str) -> MdmResult<Option<Subscription>>;
}
