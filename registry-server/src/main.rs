//! registry-server - HTTP facade for registry-core.
//!
//! Exposes subject/schema/config/mode/import operations over a
//! Confluent-wire-compatible REST surface, backed by the PostgreSQL
//! storage implementation in registry-core.

use registry_core::engine::RegistryEngine;
use registry_core::storage::postgres::PostgresBackend;
use registry_server::config::Config;
use registry_server::{build_router, db, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "registry_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting registry-server on {}:{}", config.host, config.port);

    // Create database pool and run migrations
    let pool = db::create_pool(&config.database_url).await?;

    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    // Build the registry engine on top of the Postgres backend
    let backend = PostgresBackend::from_pool(pool);
    let engine = Arc::new(RegistryEngine::new(Arc::new(backend), config.registry.clone()));

    let app = build_router(AppState { engine });

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
