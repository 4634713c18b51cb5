//! prociq-ingest - Data Ingestion & Entity Resolution service
//!
//! Turns raw uploaded procurement rows into deduplicated, quality-scored,
//! committed business records (suppliers, materials, purchase-order
//! lines, price observations).

use anyhow::Result;
use prociq_common::config::IngestConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prociq_ingest::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with env-filter (RUST_LOG), default info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting prociq-ingest");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = IngestConfig::load()?;
    info!(
        workers = config.pipeline.worker_count,
        auto_match_threshold = config.pipeline.auto_match_threshold,
        review_threshold = config.pipeline.review_threshold,
        "Pipeline configuration resolved"
    );

    info!("Database: {}", config.database_path.display());
    let db = prociq_common::db::init_database_pool(&config.database_path).await?;
    prociq_ingest::db::init_ingest_schema(&db).await?;
    info!("Database connection established");

    let bind_address = config.bind_address.clone();
    let state = AppState::new(db, config);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on {}", bind_address);
    axum::serve(listener, router).await?;

    Ok(())
}
