pub mod audit;
pub mod event_types;
pub mod intents;
pub mod projections;
pub mod subscriptions;
pub mod system;
