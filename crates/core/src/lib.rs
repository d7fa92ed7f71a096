//! Core domain model for the Keystone master-data platform.
//!
//! Everything here is deterministic and storage-agnostic: identifiers,
//! the platform error taxonomy, and the shapes of events, entities and
//! intents that flow through the pipeline.

pub mod actor;
pub mod entity;
pub mod error;
pub mod event;
pub mod id;
pub mod intent;
pub mod scope;

pub use actor::{Actor, ActorType};
pub use entity::Entity;
pub use error::{MdmError, MdmResult};
pub use event::{AppendEvent, EntityRef, EntityRole, Event, RuleTrace, TraceResult};
pub use id::{CorrelationId, EntityId, EventId, IntentId, SnapshotId};
pub use intent::{Intent, IntentResult, IntentStatus, StoredIntent};
pub use scope::{LegalEntity, Scope, TenantId};
