//! Live viewer presence for a broadcast companion service.
//!
//! Fingerprints anonymous viewers, records their presence in one of several
//! interchangeable stores (PostgreSQL, Redis, Cassandra/Scylla, memory), keeps a
//! cached "active viewers" count fresh in the background, and mints
//! time-ordered snowflake IDs for durable records.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use handlers::http::AppState;
pub use models::{Identity, Presence, Snowflake, NIL_SNOWFLAKE};
pub use repositories::PresenceStore;
pub use services::{PresencePoller, PresenceService, Pruner, SnowflakeGenerator};

use axum::routing::get;
use handlers::http;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the API router (info, count, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/info", get(http::info))
        .route("/count", get(http::count))
        .route("/health", get(http::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
