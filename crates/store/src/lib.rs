//! Storage substrate: driver abstraction, event store, event-type registry,
//! entity graph and subscription cursors.
//!
//! The [`Storage`] trait is the seam between the platform services and the
//! backing database. Two backends implement it: [`PgStorage`] (production,
//! Postgres via sqlx) and [`MemStorage`] (tests and dev mode). Services are
//! generic over the backend so the same pipeline semantics are exercised in
//! both.

pub mod driver;
pub mod entity_graph;
pub mod event_store;
pub mod memory;
pub mod pg;
pub mod registry;
pub mod schema;
pub mod subscriptions;
pub mod types;

pub use driver::Storage;
pub use entity_graph::EntityGraph;
pub use event_store::{AppendOutcome, EventStore};
pub use memory::MemStorage;
pub use pg::{DbConfig, PgStorage};
pub use registry::EventTypeRegistry;
pub use subscriptions::SubscriptionService;
pub use types::{
    DeadLetter, EventPage, ProjectionRow, RegisteredEventType, Snapshot, Subscription,
};
