use std::sync::Arc;

use keystone_api::app::{build_app, master_data_intent_types};
use keystone_api::middleware::AuthState;
use keystone_store::{DbConfig, MemStorage, PgStorage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keystone_observability::init();

    let auth = AuthState::from_secret(std::env::var("JWT_SECRET").ok(), master_data_intent_types());

    let app = if std::env::var("DB_HOST").is_ok() {
        let config = DbConfig::from_env();
        let pool = config.connect().await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;
        tracing::info!(host = %config.host, database = %config.name, "connected to postgres");
        build_app(Arc::new(PgStorage::new(pool)), auth)
    } else {
        tracing::warn!("DB_HOST not set; using in-memory storage (dev mode, nothing persists)");
        build_app(Arc::new(MemStorage::new()), auth)
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
