//! HTTP surface of the ingestion service
//!
//! Consumed by the upload gateway (batch ingest), the conflict-resolution
//! UI (queue listing + resolution), and reporting (batch summaries,
//! commit receipts).

pub mod batches;
pub mod conflicts;
pub mod health;

use crate::AppState;
use axum::routing::{get, post};
use axum::Router;

pub fn ingest_routes() -> Router<AppState> {
    Router::new()
        .route("/ingest/batches", post(batches::submit_batch))
        .route("/ingest/batches/:batch_id", get(batches::batch_summary))
        .route("/ingest/batches/:batch_id/commits", get(batches::batch_commits))
        .route("/ingest/batches/:batch_id/retry", post(batches::retry_batch))
        .route("/ingest/batches/:batch_id/cancel", post(batches::cancel_batch))
}

pub fn conflict_routes() -> Router<AppState> {
    Router::new()
        .route("/conflicts", get(conflicts::list_open))
        .route("/conflicts/:conflict_id/resolve", post(conflicts::resolve))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health::health))
}
