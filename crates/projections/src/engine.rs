//! Projection engine: handler registry, synchronous apply, rebuild.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use keystone_core::{Event, EventId, MdmError, MdmResult};
use keystone_store::{DeadLetter, Storage};

/// Table backing one projection, used by the snapshot service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionTable {
    pub table_name: String,
    pub primary_key: String,
}

/// One projection's event consumer.
///
/// Handlers must be idempotent with respect to `event.id`: applying the same
/// event twice leaves the table unchanged (upsert keyed on the row's primary
/// key, carrying `last_event_id`).
#[async_trait]
pub trait ProjectionHandler<S: Storage>: Send + Sync {
    fn projection_type(&self) -> &str;

    fn event_types(&self) -> &[String];

    async fn apply(&self, storage: &S, uow: &mut S::Uow, event: &Event) -> MdmResult<()>;

    /// Clear the projection's state ahead of a rebuild.
    async fn reset(&self, storage: &S, uow: &mut S::Uow) -> MdmResult<()>;
}

/// Outcome of a rebuild: how many subscribed events were replayed, and how
/// many of those ended up dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RebuildReport {
    pub events_processed: usize,
    pub dead_lettered: usize,
}

const DEFAULT_REBUILD_BATCH: usize = 500;

/// Process-wide handler registry. Populated at startup; read-only afterwards.
pub struct ProjectionEngine<S: Storage> {
    storage: Arc<S>,
    by_event_type: HashMap<String, Vec<Arc<dyn ProjectionHandler<S>>>>,
    by_projection: HashMap<String, Vec<Arc<dyn ProjectionHandler<S>>>>,
    tables: HashMap<String, ProjectionTable>,
}

impl<S: Storage> ProjectionEngine<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            by_event_type: HashMap::new(),
            by_projection: HashMap::new(),
            tables: HashMap::new(),
        }
    }

    /// Register the backing table for a projection type.
    pub fn register_table(&mut self, projection_type: &str, table: ProjectionTable) {
        self.tables.insert(projection_type.to_string(), table);
    }

    /// Subscribe a handler to each of its event types (order preserved).
    pub fn register_handler(&mut self, handler: Arc<dyn ProjectionHandler<S>>) {
        for event_type in handler.event_types() {
            self.by_event_type
                .entry(event_type.clone())
                .or_default()
                .push(handler.clone());
        }
        self.by_projection
            .entry(handler.projection_type().to_string())
            .or_default()
            .push(handler);
    }

    pub fn table(&self, projection_type: &str) -> Option<&ProjectionTable> {
        self.tables.get(projection_type)
    }

    pub fn projection_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.by_projection.keys().cloned().collect();
        types.sort();
        types
    }

    /// Apply one event to every subscribed handler, inside the caller's unit
    /// of work. Any handler failure propagates so the caller aborts the whole
    /// transaction — projection updates are never partially applied.
    pub async fn process_event(&self, uow: &mut S::Uow, event: &Event) -> MdmResult<()> {
        let Some(handlers) = self.by_event_type.get(&event.event_type) else {
            return Ok(());
        };
        for handler in handlers {
            handler.apply(&self.storage, uow, event).await?;
        }
        Ok(())
    }

    /// Rebuild one projection from the log.
    ///
    /// Resets the projection, then replays subscribed events in sequence
    /// order, one unit of work per batch. An event a handler cannot apply
    /// aborts its batch transaction; the event is dead-lettered and the batch
    /// retried without it, so a single poison event never blocks the rebuild.
    #[instrument(skip(self), err)]
    pub async fn rebuild(
        &self,
        projection_type: &str,
        batch_size: Option<usize>,
    ) -> MdmResult<RebuildReport> {
        let handlers = self.by_projection.get(projection_type).ok_or_else(|| {
            MdmError::validation_field("projection_type", format!("unknown projection type '{projection_type}'"))
        })?;
        let batch_size = batch_size.unwrap_or(DEFAULT_REBUILD_BATCH).max(1);

        let mut uow = self.storage.begin().await?;
        for handler in handlers {
            handler.reset(&self.storage, &mut uow).await?;
        }
        self.storage.commit(uow).await?;

        let mut events_processed = 0usize;
        let mut dead_lettered = 0usize;
        let mut after = 0i64;

        loop {
            let batch = self.storage.events_after(after, batch_size as i64).await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = last.sequence;

            let relevant: Vec<&Event> = batch
                .iter()
                .filter(|e| {
                    handlers
                        .iter()
                        .any(|h| h.event_types().contains(&e.event_type))
                })
                .collect();
            if relevant.is_empty() {
                continue;
            }

            let mut skip: HashSet<EventId> = HashSet::new();
            'batch: loop {
                let mut uow = self.storage.begin().await?;
                for event in &relevant {
                    if skip.contains(&event.id) {
                        continue;
                    }
                    for handler in handlers {
                        if !handler.event_types().contains(&event.event_type) {
                            continue;
                        }
                        if let Err(err) = handler.apply(&self.storage, &mut uow, event).await {
                            tracing::warn!(
                                projection_type,
                                event_id = %event.id,
                                error = %err,
                                "dead-lettering poison event"
                            );
                            self.storage.rollback(uow).await?;
                            self.record_dead_letter(projection_type, event, &err).await?;
                            skip.insert(event.id);
                            dead_lettered += 1;
                            continue 'batch;
                        }
                    }
                }
                self.storage.commit(uow).await?;
                break;
            }

            events_processed += relevant.len();
        }

        tracing::info!(projection_type, events_processed, dead_lettered, "rebuild complete");
        Ok(RebuildReport {
            events_processed,
            dead_lettered,
        })
    }

    pub async fn dead_letters(&self, projection_type: &str) -> MdmResult<Vec<DeadLetter>> {
        self.storage.dead_letters(projection_type).await
    }

    async fn record_dead_letter(
        &self,
        projection_type: &str,
        event: &Event,
        err: &MdmError,
    ) -> MdmResult<()> {
        let entry = DeadLetter {
            projection_type: projection_type.to_string(),
            event_id: event.id,
            event_sequence: event.sequence,
            event_type: event.event_type.clone(),
            failed_at: Utc::now(),
            error_message: err.to_string(),
        };
        let mut uow = self.storage.begin().await?;
        self.storage.insert_dead_letter(&mut uow, &entry).await?;
        self.storage.commit(uow).await
    }
}
