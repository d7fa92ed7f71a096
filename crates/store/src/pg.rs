//! Postgres-backed storage driver.
//!
//! One [`PgUnitOfWork`] owns one sqlx transaction; everything the services
//! stage through it commits or rolls back as a unit. Tenancy scoping,
//! optimistic concurrency and idempotency semantics live in the services —
//! this module enforces them mechanically through constraints:
//!
//! | PostgreSQL error code | Mapped to | Scenario |
//! |-----------------------|-----------|----------|
//! | `23505` on `events.idempotency_key` | `IdempotencyConflict` | key raced by a concurrent append |
//! | `23505` elsewhere | `Storage("unique_violation")` | duplicate entity / registry key |
//! | any other | `Storage(<code>)` | connection, constraint, decode failures |
//!
//! The sequence allocator is a single counter row updated under row-level
//! lock, so concurrent appends serialize and commit order equals sequence
//! order.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use async_trait::async_trait;

use keystone_core::{
    Actor, CorrelationId, Entity, EntityId, EntityRef, Event, EventId, Intent, IntentId,
    IntentStatus, LegalEntity, MdmError, MdmResult, RuleTrace, Scope, SnapshotId, StoredIntent,
    TenantId,
};

use crate::driver::Storage;
use crate::types::{DeadLetter, ProjectionRow, RegisteredEventType, Snapshot, Subscription};

/// Connection settings, read from the conventional environment variables.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Self {
        let var = |key: &str, default: &str| {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        Self {
            host: var("DB_HOST", "localhost"),
            port: var("DB_PORT", "5432").parse().unwrap_or(5432),
            name: var("DB_NAME", "keystone"),
            user: var("DB_USER", "keystone"),
            password: var("DB_PASSWORD", ""),
            max_connections: 10,
        }
    }

    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }

    pub async fn connect(&self) -> MdmResult<PgPool> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url())
            .await
            .map_err(|e| map_sqlx_error("connect", e))
    }
}

/// One transactional scope over a pooled connection.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

/// Postgres storage driver over a bounded connection pool.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Storage for PgStorage {
    type Uow = PgUnitOfWork;

    async fn begin(&self) -> MdmResult<Self::Uow> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PgUnitOfWork { tx })
    }

    async fn commit(&self, uow: Self::Uow) -> MdmResult<()> {
        uow.tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(&self, uow: Self::Uow) -> MdmResult<()> {
        uow.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }

    async fn ping(&self) -> MdmResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| map_sqlx_error("ping", e))
    }

    #[instrument(skip(self, uow), err)]
    async fn next_sequence(&self, uow: &mut Self::Uow) -> MdmResult<i64> {
        let row = sqlx::query(
            "UPDATE event_sequence SET last_value = last_value + 1 RETURNING last_value",
        )
        .fetch_one(&mut *uow.tx)
        .await
        .map_err(|e| map_sqlx_error("next_sequence", e))?;

        row.try_get("last_value")
            .map_err(|e| decode_error("next_sequence", e))
    }

    #[instrument(
        skip(self, uow, event),
        fields(event_id = %event.id, event_type = %event.event_type, sequence = event.sequence),
        err
    )]
    async fn insert_event(&self, uow: &mut Self::Uow, event: &Event) -> MdmResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (
                id, sequence, event_type, schema_version,
                occurred_at, recorded_at, effective_date,
                tenant_id, legal_entity, actor,
                intent_id, correlation_id, caused_by,
                data, entities, rules_evaluated, idempotency_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.sequence)
        .bind(&event.event_type)
        .bind(event.schema_version)
        .bind(event.occurred_at)
        .bind(event.recorded_at)
        .bind(event.effective_date)
        .bind(event.scope.tenant_id.as_str())
        .bind(event.scope.legal_entity.as_str())
        .bind(to_json("actor", &event.actor)?)
        .bind(event.intent_id.map(|id| *id.as_uuid()))
        .bind(event.correlation_id.map(|id| *id.as_uuid()))
        .bind(event.caused_by.map(|id| *id.as_uuid()))
        .bind(&event.data)
        .bind(to_json("entities", &event.entities)?)
        .bind(to_json("rules_evaluated", &event.rules_evaluated)?)
        .bind(event.idempotency_key.as_deref())
        .execute(&mut *uow.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if violates_constraint(&e, "events_idempotency_key") => {
                // Lost an idempotency race to a concurrent committed append;
                // resolve the winning event outside the aborted transaction.
                let key = event.idempotency_key.clone().unwrap_or_default();
                let existing = self.event_by_idempotency_key(None, &key).await?;
                match existing {
                    Some(winner) => Err(MdmError::IdempotencyConflict {
                        key,
                        existing_event_id: winner.id,
                    }),
                    None => Err(map_sqlx_error("insert_event", e)),
                }
            }
            Err(e) => Err(map_sqlx_error("insert_event", e)),
        }
    }

    async fn event_by_idempotency_key(
        &self,
        uow: Option<&mut Self::Uow>,
        key: &str,
    ) -> MdmResult<Option<Event>> {
        let sql = format!("{EVENT_SELECT} WHERE idempotency_key = $1 LIMIT 1");
        let query = sqlx::query(&sql).bind(key);

        let row = match uow {
            Some(uow) => query.fetch_optional(&mut *uow.tx).await,
            None => query.fetch_optional(&self.pool).await,
        }
        .map_err(|e| map_sqlx_error("event_by_idempotency_key", e))?;

        row.map(event_from_row).transpose()
    }

    async fn event_by_id(&self, id: EventId) -> MdmResult<Option<Event>> {
        let sql = format!("{EVENT_SELECT} WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("event_by_id", e))?;

        row.map(event_from_row).transpose()
    }

    async fn events_after(&self, after_sequence: i64, limit: i64) -> MdmResult<Vec<Event>> {
        let sql = format!("{EVENT_SELECT} WHERE sequence > $1 ORDER BY sequence ASC LIMIT $2");
        let rows = sqlx::query(&sql)
            .bind(after_sequence)
            .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("events_after", e))?;

        rows.into_iter().map(event_from_row).collect()
    }

    async fn events_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> MdmResult<Vec<Event>> {
        let sql = format!("{EVENT_SELECT} WHERE correlation_id = $1 ORDER BY sequence ASC");
        let rows = sqlx::query(&sql)
            .bind(correlation_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("events_by_correlation", e))?;

        rows.into_iter().map(event_from_row).collect()
    }

    async fn max_sequence(&self, uow: Option<&mut Self::Uow>) -> MdmResult<i64> {
        let query = sqlx::query("SELECT COALESCE(MAX(sequence), 0) AS max_sequence FROM events");
        let row = match uow {
            Some(uow) => query.fetch_one(&mut *uow.tx).await,
            None => query.fetch_one(&self.pool).await,
        }
        .map_err(|e| map_sqlx_error("max_sequence", e))?;

        row.try_get("max_sequence")
            .map_err(|e| decode_error("max_sequence", e))
    }

    #[instrument(
        skip(self, uow, entity),
        fields(entity_type = %entity.entity_type, entity_id = %entity.entity_id),
        err
    )]
    async fn insert_entity(&self, uow: &mut Self::Uow, entity: &Entity) -> MdmResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (
                entity_type, entity_id, legal_entity, attributes, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&entity.entity_type)
        .bind(entity.entity_id.as_uuid())
        .bind(entity.legal_entity.as_str())
        .bind(&entity.attributes)
        .bind(entity.version)
        .bind(entity.created_at)
        .bind(entity.updated_at)
        .execute(&mut *uow.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_entity", e))?;

        Ok(())
    }

    async fn entity_by_key(
        &self,
        uow: Option<&mut Self::Uow>,
        entity_type: &str,
        entity_id: EntityId,
    ) -> MdmResult<Option<Entity>> {
        let sql = format!("{ENTITY_SELECT} WHERE entity_type = $1 AND entity_id = $2");
        let query = sqlx::query(&sql).bind(entity_type).bind(entity_id.as_uuid());

        let row = match uow {
            Some(uow) => query.fetch_optional(&mut *uow.tx).await,
            None => query.fetch_optional(&self.pool).await,
        }
        .map_err(|e| map_sqlx_error("entity_by_key", e))?;

        row.map(entity_from_row).transpose()
    }

    async fn entity_by_attribute(
        &self,
        uow: Option<&mut Self::Uow>,
        entity_type: &str,
        path: &str,
        value: &JsonValue,
        legal_entity: &LegalEntity,
    ) -> MdmResult<Option<Entity>> {
        let segments: Vec<String> = path.split('.').map(String::from).collect();
        let sql = format!(
            r#"
            {ENTITY_SELECT}
            WHERE entity_type = $1
              AND legal_entity = $2
              AND attributes #> $3 = $4
            ORDER BY created_at ASC
            LIMIT 1
            "#
        );
        let query = sqlx::query(&sql)
            .bind(entity_type)
            .bind(legal_entity.as_str())
            .bind(&segments)
            .bind(value);

        let row = match uow {
            Some(uow) => query.fetch_optional(&mut *uow.tx).await,
            None => query.fetch_optional(&self.pool).await,
        }
        .map_err(|e| map_sqlx_error("entity_by_attribute", e))?;

        row.map(entity_from_row).transpose()
    }

    #[instrument(skip(self, uow, attributes, updated_at), err)]
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
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET attributes = $5, version = version + 1, updated_at = $6
            WHERE entity_type = $1 AND entity_id = $2 AND legal_entity = $3 AND version = $4
            "#,
        )
        .bind(entity_type)
        .bind(entity_id.as_uuid())
        .bind(legal_entity.as_str())
        .bind(expected_version)
        .bind(attributes)
        .bind(updated_at)
        .execute(&mut *uow.tx)
        .await
        .map_err(|e| map_sqlx_error("update_entity_cas", e))?;

        Ok(result.rows_affected())
    }

    async fn entities_by_type(
        &self,
        entity_type: &str,
        legal_entity: Option<&LegalEntity>,
    ) -> MdmResult<Vec<Entity>> {
        let sql = format!(
            r#"
            {ENTITY_SELECT}
            WHERE entity_type = $1
              AND ($2::text IS NULL OR legal_entity = $2)
            ORDER BY created_at ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(entity_type)
            .bind(legal_entity.map(|le| le.as_str().to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("entities_by_type", e))?;

        rows.into_iter().map(entity_from_row).collect()
    }

    async fn upsert_event_type(
        &self,
        uow: &mut Self::Uow,
        registered: &RegisteredEventType,
    ) -> MdmResult<()> {
        sqlx::query(
            r#"
            INSERT INTO event_type_registry (
                type_name, schema_version, json_schema, description, registered_at
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (type_name, schema_version)
            DO UPDATE SET
                json_schema = EXCLUDED.json_schema,
                description = EXCLUDED.description,
                registered_at = EXCLUDED.registered_at
            "#,
        )
        .bind(&registered.type_name)
        .bind(registered.schema_version)
        .bind(&registered.json_schema)
        .bind(registered.description.as_deref())
        .bind(registered.registered_at)
        .execute(&mut *uow.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_event_type", e))?;

        Ok(())
    }

    async fn event_type(
        &self,
        type_name: &str,
        schema_version: i32,
    ) -> MdmResult<Option<RegisteredEventType>> {
        let row = sqlx::query(
            r#"
            SELECT type_name, schema_version, json_schema, description, registered_at
            FROM event_type_registry
            WHERE type_name = $1 AND schema_version = $2
            "#,
        )
        .bind(type_name)
        .bind(schema_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("event_type", e))?;

        row.map(event_type_from_row).transpose()
    }

    async fn event_types(&self) -> MdmResult<Vec<RegisteredEventType>> {
        let rows = sqlx::query(
            r#"
            SELECT type_name, schema_version, json_schema, description, registered_at
            FROM event_type_registry
            ORDER BY type_name ASC, schema_version ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("event_types", e))?;

        rows.into_iter().map(event_type_from_row).collect()
    }

    async fn upsert_projection_row(
        &self,
        uow: &mut Self::Uow,
        table: &str,
        row: &ProjectionRow,
    ) -> MdmResult<()> {
        // Table names come from the projection-table registry, never from
        // request input.
        let sql = format!(
            r#"
            INSERT INTO "{table}" (pk, legal_entity, last_event_id, data, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (pk)
            DO UPDATE SET
                legal_entity = EXCLUDED.legal_entity,
                last_event_id = EXCLUDED.last_event_id,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#
        );
        sqlx::query(&sql)
            .bind(&row.pk)
            .bind(row.legal_entity.as_str())
            .bind(row.last_event_id.as_uuid())
            .bind(&row.data)
            .bind(row.updated_at)
            .execute(&mut *uow.tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_projection_row", e))?;

        Ok(())
    }

    async fn delete_projection_rows(&self, uow: &mut Self::Uow, table: &str) -> MdmResult<()> {
        let sql = format!(r#"DELETE FROM "{table}""#);
        sqlx::query(&sql)
            .execute(&mut *uow.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_projection_rows", e))?;
        Ok(())
    }

    async fn projection_rows(
        &self,
        uow: Option<&mut Self::Uow>,
        table: &str,
    ) -> MdmResult<Vec<ProjectionRow>> {
        let sql = format!(
            r#"SELECT pk, legal_entity, last_event_id, data, updated_at FROM "{table}" ORDER BY pk ASC"#
        );
        let query = sqlx::query(&sql);
        let rows = match uow {
            Some(uow) => query.fetch_all(&mut *uow.tx).await,
            None => query.fetch_all(&self.pool).await,
        }
        .map_err(|e| map_sqlx_error("projection_rows", e))?;

        rows.into_iter().map(projection_row_from_row).collect()
    }

    async fn insert_snapshot(&self, uow: &mut Self::Uow, snapshot: &Snapshot) -> MdmResult<()> {
        sqlx::query(
            r#"
            INSERT INTO projection_snapshots (
                snapshot_id, projection_type, sequence_number, created_at, blob
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(snapshot.snapshot_id.as_uuid())
        .bind(&snapshot.projection_type)
        .bind(snapshot.sequence_number)
        .bind(snapshot.created_at)
        .bind(to_json("blob", &snapshot.blob)?)
        .execute(&mut *uow.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_snapshot", e))?;

        Ok(())
    }

    async fn snapshot_by_id(&self, snapshot_id: SnapshotId) -> MdmResult<Option<Snapshot>> {
        let row = sqlx::query(
            r#"
            SELECT snapshot_id, projection_type, sequence_number, created_at, blob
            FROM projection_snapshots
            WHERE snapshot_id = $1
            "#,
        )
        .bind(snapshot_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("snapshot_by_id", e))?;

        row.map(snapshot_from_row).transpose()
    }

    async fn snapshots_by_type(&self, projection_type: &str) -> MdmResult<Vec<Snapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT snapshot_id, projection_type, sequence_number, created_at, blob
            FROM projection_snapshots
            WHERE projection_type = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(projection_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("snapshots_by_type", e))?;

        rows.into_iter().map(snapshot_from_row).collect()
    }

    async fn insert_dead_letter(&self, uow: &mut Self::Uow, entry: &DeadLetter) -> MdmResult<()> {
        sqlx::query(
            r#"
            INSERT INTO projection_dead_letters (
                projection_type, event_id, event_sequence, event_type, failed_at, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&entry.projection_type)
        .bind(entry.event_id.as_uuid())
        .bind(entry.event_sequence)
        .bind(&entry.event_type)
        .bind(entry.failed_at)
        .bind(&entry.error_message)
        .execute(&mut *uow.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_dead_letter", e))?;

        Ok(())
    }

    async fn dead_letters(&self, projection_type: &str) -> MdmResult<Vec<DeadLetter>> {
        let rows = sqlx::query(
            r#"
            SELECT projection_type, event_id, event_sequence, event_type, failed_at, error_message
            FROM projection_dead_letters
            WHERE projection_type = $1
            ORDER BY event_sequence ASC
            "#,
        )
        .bind(projection_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("dead_letters", e))?;

        rows.into_iter().map(dead_letter_from_row).collect()
    }

    async fn insert_intent(&self, uow: &mut Self::Uow, intent: &StoredIntent) -> MdmResult<()> {
        sqlx::query(
            r#"
            INSERT INTO intents (
                intent_id, intent_type, intent, status, required_approver_role, submitted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(intent.intent_id.as_uuid())
        .bind(&intent.intent_type)
        .bind(to_json("intent", &intent.intent)?)
        .bind(intent_status_str(intent.status))
        .bind(intent.required_approver_role.as_deref())
        .bind(intent.submitted_at)
        .execute(&mut *uow.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_intent", e))?;

        Ok(())
    }

    async fn intent_by_id(&self, intent_id: IntentId) -> MdmResult<Option<StoredIntent>> {
        let row = sqlx::query(
            r#"
            SELECT intent_id, intent_type, intent, status, required_approver_role, submitted_at
            FROM intents
            WHERE intent_id = $1
            "#,
        )
        .bind(intent_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("intent_by_id", e))?;

        row.map(stored_intent_from_row).transpose()
    }

    async fn upsert_subscription(
        &self,
        uow: &mut Self::Uow,
        subscription: &Subscription,
    ) -> MdmResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (subscriber_id, event_types, last_processed_seq, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subscriber_id)
            DO UPDATE SET
                event_types = EXCLUDED.event_types,
                last_processed_seq = EXCLUDED.last_processed_seq,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&subscription.subscriber_id)
        .bind(&subscription.event_types)
        .bind(subscription.last_processed_seq)
        .bind(subscription.updated_at)
        .execute(&mut *uow.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_subscription", e))?;

        Ok(())
    }

    async fn subscription(&self, subscriber_id: &str) -> MdmResult<Option<Subscription>> {
        let row = sqlx::query(
            r#"
            SELECT subscriber_id, event_types, last_processed_seq, updated_at
            FROM subscriptions
            WHERE subscriber_id = $1
            "#,
        )
        .bind(subscriber_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("subscription", e))?;

        row.map(subscription_from_row).transpose()
    }
}

const EVENT_SELECT: &str = r#"
    SELECT id, sequence, event_type, schema_version,
           occurred_at, recorded_at, effective_date,
           tenant_id, legal_entity, actor,
           intent_id, correlation_id, caused_by,
           data, entities, rules_evaluated, idempotency_key
    FROM events
"#;

const ENTITY_SELECT: &str = r#"
    SELECT entity_type, entity_id, legal_entity, attributes, version, created_at, updated_at
    FROM entities
"#;

// ── row decoding ────────────────────────────────────────────────────────

fn event_from_row(row: PgRow) -> MdmResult<Event> {
    let decode = |e: sqlx::Error| decode_error("events", e);
    let actor: JsonValue = row.try_get("actor").map_err(decode)?;
    let entities: JsonValue = row.try_get("entities").map_err(decode)?;
    let rules: JsonValue = row.try_get("rules_evaluated").map_err(decode)?;

    Ok(Event {
        id: EventId::from_uuid(row.try_get("id").map_err(decode)?),
        sequence: row.try_get("sequence").map_err(decode)?,
        event_type: row.try_get("event_type").map_err(decode)?,
        schema_version: row.try_get("schema_version").map_err(decode)?,
        occurred_at: row.try_get("occurred_at").map_err(decode)?,
        recorded_at: row.try_get("recorded_at").map_err(decode)?,
        effective_date: row.try_get("effective_date").map_err(decode)?,
        scope: Scope {
            tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").map_err(decode)?),
            legal_entity: LegalEntity::new(
                row.try_get::<String, _>("legal_entity").map_err(decode)?,
            ),
        },
        actor: from_json::<Actor>("actor", actor)?,
        intent_id: row
            .try_get::<Option<uuid::Uuid>, _>("intent_id")
            .map_err(decode)?
            .map(IntentId::from_uuid),
        correlation_id: row
            .try_get::<Option<uuid::Uuid>, _>("correlation_id")
            .map_err(decode)?
            .map(CorrelationId::from_uuid),
        caused_by: row
            .try_get::<Option<uuid::Uuid>, _>("caused_by")
            .map_err(decode)?
            .map(EventId::from_uuid),
        data: row.try_get("data").map_err(decode)?,
        entities: from_json::<Vec<EntityRef>>("entities", entities)?,
        rules_evaluated: from_json::<Vec<RuleTrace>>("rules_evaluated", rules)?,
        idempotency_key: row.try_get("idempotency_key").map_err(decode)?,
    })
}

fn entity_from_row(row: PgRow) -> MdmResult<Entity> {
    let decode = |e: sqlx::Error| decode_error("entities", e);
    Ok(Entity {
        entity_type: row.try_get("entity_type").map_err(decode)?,
        entity_id: EntityId::from_uuid(row.try_get("entity_id").map_err(decode)?),
        legal_entity: LegalEntity::new(row.try_get::<String, _>("legal_entity").map_err(decode)?),
        attributes: row.try_get("attributes").map_err(decode)?,
        version: row.try_get("version").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn event_type_from_row(row: PgRow) -> MdmResult<RegisteredEventType> {
    let decode = |e: sqlx::Error| decode_error("event_type_registry", e);
    Ok(RegisteredEventType {
        type_name: row.try_get("type_name").map_err(decode)?,
        schema_version: row.try_get("schema_version").map_err(decode)?,
        json_schema: row.try_get("json_schema").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        registered_at: row.try_get("registered_at").map_err(decode)?,
    })
}

fn projection_row_from_row(row: PgRow) -> MdmResult<ProjectionRow> {
    let decode = |e: sqlx::Error| decode_error("projection_rows", e);
    Ok(ProjectionRow {
        pk: row.try_get("pk").map_err(decode)?,
        legal_entity: LegalEntity::new(row.try_get::<String, _>("legal_entity").map_err(decode)?),
        last_event_id: EventId::from_uuid(row.try_get("last_event_id").map_err(decode)?),
        data: row.try_get("data").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn snapshot_from_row(row: PgRow) -> MdmResult<Snapshot> {
    let decode = |e: sqlx::Error| decode_error("projection_snapshots", e);
    let blob: JsonValue = row.try_get("blob").map_err(decode)?;
    Ok(Snapshot {
        snapshot_id: SnapshotId::from_uuid(row.try_get("snapshot_id").map_err(decode)?),
        projection_type: row.try_get("projection_type").map_err(decode)?,
        sequence_number: row.try_get("sequence_number").map_err(decode)?,
        is_stale: false,
        created_at: row.try_get("created_at").map_err(decode)?,
        blob: from_json::<Vec<ProjectionRow>>("blob", blob)?,
    })
}

fn dead_letter_from_row(row: PgRow) -> MdmResult<DeadLetter> {
    let decode = |e: sqlx::Error| decode_error("projection_dead_letters", e);
    Ok(DeadLetter {
        projection_type: row.try_get("projection_type").map_err(decode)?,
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(decode)?),
        event_sequence: row.try_get("event_sequence").map_err(decode)?,
        event_type: row.try_get("event_type").map_err(decode)?,
        failed_at: row.try_get("failed_at").map_err(decode)?,
        error_message: row.try_get("error_message").map_err(decode)?,
    })
}

fn stored_intent_from_row(row: PgRow) -> MdmResult<StoredIntent> {
    let decode = |e: sqlx::Error| decode_error("intents", e);
    let intent: JsonValue = row.try_get("intent").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    Ok(StoredIntent {
        intent_id: IntentId::from_uuid(row.try_get("intent_id").map_err(decode)?),
        intent_type: row.try_get("intent_type").map_err(decode)?,
        intent: from_json::<Intent>("intent", intent)?,
        status: parse_intent_status(&status)?,
        required_approver_role: row.try_get("required_approver_role").map_err(decode)?,
        submitted_at: row.try_get("submitted_at").map_err(decode)?,
    })
}

fn subscription_from_row(row: PgRow) -> MdmResult<Subscription> {
    let decode = |e: sqlx::Error| decode_error("subscriptions", e);
    Ok(Subscription {
        subscriber_id: row.try_get("subscriber_id").map_err(decode)?,
        event_types: row.try_get("event_types").map_err(decode)?,
        last_processed_seq: row.try_get("last_processed_seq").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn intent_status_str(status: IntentStatus) -> &'static str {
    match status {
        IntentStatus::PendingApproval => "pending_approval",
    }
}

fn parse_intent_status(raw: &str) -> MdmResult<IntentStatus> {
    match raw {
        "pending_approval" => Ok(IntentStatus::PendingApproval),
        other => Err(MdmError::storage(
            "decode",
            format!("unknown intent status '{other}'"),
        )),
    }
}

// ── error mapping ───────────────────────────────────────────────────────

fn to_json<T: serde::Serialize>(what: &str, value: &T) -> MdmResult<JsonValue> {
    serde_json::to_value(value)
        .map_err(|e| MdmError::storage("encode", format!("failed to encode {what}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(what: &str, value: JsonValue) -> MdmResult<T> {
    serde_json::from_value(value)
        .map_err(|e| MdmError::storage("decode", format!("failed to decode {what}: {e}")))
}

fn decode_error(table: &str, err: sqlx::Error) -> MdmError {
    MdmError::storage("decode", format!("failed to decode {table} row: {err}"))
}

/// Map sqlx errors onto the platform taxonomy.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> MdmError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => MdmError::storage("unique_violation", msg),
                Some(code) => MdmError::storage(code.to_string(), msg),
                None => MdmError::storage("database", msg),
            }
        }
        sqlx::Error::PoolClosed => {
            MdmError::storage("pool_closed", format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            MdmError::storage("pool_timeout", format!("connection pool timed out in {operation}"))
        }
        _ => MdmError::storage("io", format!("sqlx error in {operation}: {err}")),
    }
}

/// True when `err` is a unique violation on a constraint whose name starts
/// with `constraint_prefix`.
fn violates_constraint(err: &sqlx::Error, constraint_prefix: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return db_err
                .constraint()
                .map(|name| name.starts_with(constraint_prefix))
                .unwrap_or(false);
        }
    }
    false
}
