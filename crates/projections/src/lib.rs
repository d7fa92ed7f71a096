//! Read side: projection engine, master-data read models and snapshots.
//!
//! Handlers run synchronously inside the write transaction, so a projection
//! is never newer or older than its event. Rebuilds replay the log in
//! sequence order, dead-lettering events a handler cannot apply.

pub mod engine;
pub mod master_data;
pub mod snapshot;

pub use engine::{ProjectionEngine, ProjectionHandler, ProjectionTable, RebuildReport};
pub use master_data::MasterDataProjection;
pub use snapshot::SnapshotService;
