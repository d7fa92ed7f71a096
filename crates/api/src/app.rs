//! Application wiring: services, handler registration, router.

use std::sync::Arc;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Extension, Router,
};

use keystone_pipeline::{
    master_data_handlers, IntentPipeline, MasterDataType, PipelineServices, RulesetRegistry,
};
use keystone_projections::{
    MasterDataProjection, ProjectionEngine, SnapshotService,
};
use keystone_store::{
    EntityGraph, EventStore, EventTypeRegistry, Storage, SubscriptionService,
};

use crate::middleware::{auth_middleware, AuthState};
use crate::routes;

/// Process-wide services, shared across requests. Built once at startup and
/// read-only afterwards.
pub struct AppState<S: Storage> {
    pub storage: Arc<S>,
    pub pipeline: IntentPipeline<S>,
    pub events: Arc<EventStore<S>>,
    pub registry: Arc<EventTypeRegistry<S>>,
    pub entities: Arc<EntityGraph<S>>,
    pub projections: Arc<ProjectionEngine<S>>,
    pub snapshots: SnapshotService<S>,
    pub subscriptions: SubscriptionService<S>,
}

/// Intent types the built-in master-data handlers cover; doubles as the
/// development actor's capability set.
pub fn master_data_intent_types() -> Vec<String> {
    let mut types = Vec::new();
    for config in [MasterDataType::vendor(), MasterDataType::item()] {
        types.push(config.create_intent);
        types.push(config.update_intent);
    }
    types
}

/// Wire the platform services over one storage backend.
pub fn build_state<S: Storage>(storage: Arc<S>) -> AppState<S> {
    let registry = Arc::new(EventTypeRegistry::new(storage.clone()));
    let events = Arc::new(EventStore::new(storage.clone(), registry.clone()));
    let entities = Arc::new(EntityGraph::new(storage.clone()));

    let mut engine = ProjectionEngine::new(storage.clone());
    for (projection_type, projection) in [
        ("vendor_list", MasterDataProjection::vendor_list()),
        ("item_catalog", MasterDataProjection::item_catalog()),
    ] {
        engine.register_table(projection_type, projection.table_config());
        engine.register_handler(Arc::new(projection));
    }
    let projections = Arc::new(engine);

    let snapshots = SnapshotService::new(storage.clone(), projections.clone());
    let subscriptions = SubscriptionService::new(storage.clone());

    let mut pipeline = IntentPipeline::new(PipelineServices {
        storage: storage.clone(),
        events: events.clone(),
        entities: entities.clone(),
        projections: projections.clone(),
        rulesets: Arc::new(RulesetRegistry::master_data_defaults()),
    });
    for handler in master_data_handlers() {
        pipeline.register_handler(handler);
    }

    AppState {
        storage,
        pipeline,
        events,
        registry,
        entities,
        projections,
        snapshots,
        subscriptions,
    }
}

/// Build the HTTP router. `/health` stays outside the auth boundary.
pub fn build_app<S: Storage>(storage: Arc<S>, auth: AuthState) -> Router {
    let state = Arc::new(build_state(storage));

    let protected = Router::new()
        .route("/intents", post(routes::intents::submit::<S>))
        .route("/audit/events", get(routes::audit::list_events::<S>))
        .route("/audit/events/:id", get(routes::audit::get_event::<S>))
        .route(
            "/audit/correlations/:id",
            get(routes::audit::by_correlation::<S>),
        )
        .route("/projections/:ptype", get(routes::projections::rows::<S>))
        .route(
            "/projections/:ptype/rebuild",
            post(routes::projections::rebuild::<S>),
        )
        .route(
            "/projections/:ptype/snapshot",
            post(routes::projections::create_snapshot::<S>),
        )
        .route(
            "/projections/:ptype/snapshot/restore",
            post(routes::projections::restore_snapshot::<S>),
        )
        .route(
            "/projections/:ptype/snapshots",
            get(routes::projections::list_snapshots::<S>),
        )
        .route(
            "/projections/:ptype/dead-letters",
            get(routes::projections::dead_letters::<S>),
        )
        .route(
            "/event-types",
            get(routes::event_types::list::<S>).post(routes::event_types::register::<S>),
        )
        .route("/event-types/:name", get(routes::event_types::versions::<S>))
        .route("/subscriptions", post(routes::subscriptions::register::<S>))
        .route("/subscriptions/:id", get(routes::subscriptions::get::<S>))
        .route("/subscriptions/:id/ack", post(routes::subscriptions::ack::<S>))
        .layer(from_fn_with_state(auth, auth_middleware));

    Router::new()
        .route("/health", get(routes::system::health::<S>))
        .merge(protected)
        .layer(Extension(state))
}
