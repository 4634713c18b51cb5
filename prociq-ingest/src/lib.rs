//! prociq-ingest library interface
//!
//! Exposes the pipeline, models, and HTTP surface for integration testing.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use pipeline::Orchestrator;
use prociq_common::config::IngestConfig;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Service configuration
    pub config: Arc<IngestConfig>,
    /// Batch orchestrator (org serialization + cancellation registry)
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: IngestConfig) -> Self {
        let config = Arc::new(config);
        let orchestrator = Arc::new(Orchestrator::new(db.clone(), config.clone()));
        Self {
            db,
            config,
            orchestrator,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::ingest_routes())
        .merge(api::conflict_routes())
        .merge(api::health_routes())
        .with_state(state)
}
