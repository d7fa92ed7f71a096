//! Append-only event store with global sequencing, idempotency and OCC.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use keystone_core::{
    AppendEvent, CorrelationId, Event, EventId, MdmError, MdmResult,
};

use crate::driver::Storage;
use crate::registry::EventTypeRegistry;
use crate::types::EventPage;

const DEFAULT_PAGE_LIMIT: i64 = 100;
const MAX_PAGE_LIMIT: i64 = 1000;

/// Result of an append. A replay is a successful outcome, never an error:
/// the pipeline converts it into a committed-looking result without a new
/// commit.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// A new event was staged in the caller's unit of work.
    Committed(Event),
    /// The idempotency key already mapped to this event.
    Replayed(Event),
}

impl AppendOutcome {
    pub fn event(&self) -> &Event {
        match self {
            AppendOutcome::Committed(e) | AppendOutcome::Replayed(e) => e,
        }
    }

    pub fn into_event(self) -> Event {
        match self {
            AppendOutcome::Committed(e) | AppendOutcome::Replayed(e) => e,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, AppendOutcome::Replayed(_))
    }
}

/// The append-only log. Writes go through a caller-provided unit of work;
/// audit reads query committed state directly.
pub struct EventStore<S: Storage> {
    storage: Arc<S>,
    registry: Arc<EventTypeRegistry<S>>,
}

impl<S: Storage> EventStore<S> {
    pub fn new(storage: Arc<S>, registry: Arc<EventTypeRegistry<S>>) -> Self {
        Self { storage, registry }
    }

    /// Append an event inside the caller's unit of work.
    ///
    /// Assigns `id`, stamps `recorded_at` and resolves `sequence` from the
    /// serialized allocator. Validates `data` against the registered schema
    /// for `(event_type, schema_version)` when one exists. When
    /// `expected_entity_version` is set, fails with a concurrency conflict
    /// unless the subject entity is at exactly that version under the same
    /// unit of work.
    #[instrument(
        skip(self, uow, input),
        fields(event_type = %input.event_type, idempotency_key = ?input.idempotency_key),
        err
    )]
    pub async fn append(&self, uow: &mut S::Uow, input: AppendEvent) -> MdmResult<AppendOutcome> {
        if let Some(key) = &input.idempotency_key {
            if let Some(existing) = self
                .storage
                .event_by_idempotency_key(Some(&mut *uow), key)
                .await?
            {
                tracing::debug!(%existing.id, "idempotent replay");
                return Ok(AppendOutcome::Replayed(existing));
            }
        }

        self.registry
            .validate(&input.event_type, input.schema_version, &input.data)
            .await?;

        if input.subject().is_none() {
            // Mutating events are expected to carry a subject ref; tolerated
            // for compatibility with imported streams.
            tracing::warn!(event_type = %input.event_type, "append without subject entity ref");
        }

        if let Some(expected) = input.expected_entity_version {
            let subject = input.subject().ok_or_else(|| {
                MdmError::validation("expected_entity_version requires a subject entity ref")
            })?;
            let current = self
                .storage
                .entity_by_key(Some(&mut *uow), &subject.entity_type, subject.entity_id)
                .await?;
            match current {
                None => {
                    return Err(MdmError::not_found(
                        subject.entity_type.clone(),
                        subject.entity_id,
                    ));
                }
                Some(entity) if entity.version != expected => {
                    return Err(MdmError::conflict(subject.entity_id, expected, entity.version));
                }
                Some(_) => {}
            }
        }

        let sequence = self.storage.next_sequence(uow).await?;
        let event = Event {
            id: EventId::new(),
            sequence,
            event_type: input.event_type,
            schema_version: input.schema_version,
            occurred_at: input.occurred_at,
            recorded_at: Utc::now(),
            effective_date: input.effective_date,
            scope: input.scope,
            actor: input.actor,
            intent_id: input.intent_id,
            correlation_id: input.correlation_id,
            caused_by: input.caused_by,
            data: input.data,
            entities: input.entities,
            rules_evaluated: input.rules_evaluated,
            idempotency_key: input.idempotency_key,
        };

        self.storage.insert_event(uow, &event).await?;
        Ok(AppendOutcome::Committed(event))
    }

    pub async fn get_by_id(&self, id: EventId) -> MdmResult<Option<Event>> {
        self.storage.event_by_id(id).await
    }

    /// Read the log ascending by sequence. `limit` defaults to 100 and is
    /// capped at 1000.
    pub async fn read_stream(
        &self,
        after_sequence: Option<i64>,
        limit: Option<i64>,
    ) -> MdmResult<EventPage> {
        let after = after_sequence.unwrap_or(0);
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);

        // One extra row decides has_more without a count query.
        let mut events = self.storage.events_after(after, limit + 1).await?;
        let has_more = events.len() as i64 > limit;
        events.truncate(limit as usize);

        let next_sequence = events.last().map(|e| e.sequence);
        Ok(EventPage {
            events,
            has_more,
            next_sequence,
        })
    }

    pub async fn get_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> MdmResult<Vec<Event>> {
        self.storage.events_by_correlation(correlation_id).await
    }
}
