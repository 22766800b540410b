//! registry-server - HTTP facade for registry-core.
//!
//! Exposes subject/schema/config/mode/import operations over a
//! Confluent-wire-compatible REST surface. The storage backend behind
//! the engine is pluggable; [`main`](crate) wires up PostgreSQL, while
//! tests wire up the in-memory backend directly.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;

use axum::Router;
use registry_core::engine::RegistryEngine;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RegistryEngine>,
}

/// Assembles the full router (routes + tracing + CORS) over a given state.
/// Split out from `main` so integration tests can mount the same surface
/// over an in-memory backend without a live database.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
