//! Table schema for the ingestion service
//!
//! The unique index on catalog_entries(organization_id, entry_type,
//! normalized_key) is the concurrency-safety anchor for the whole
//! pipeline: all catalog mutation funnels through inserts guarded by it.

use prociq_common::Result;
use sqlx::SqlitePool;

/// Create all ingestion tables if missing
pub async fn init_ingest_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_batches (
            id TEXT PRIMARY KEY,
            upload_ref TEXT NOT NULL,
            organization_id TEXT NOT NULL,
            upload_fingerprint TEXT NOT NULL,
            source_headers TEXT NOT NULL DEFAULT '[]',
            mapping_template TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            failure_reason TEXT,
            UNIQUE(organization_id, upload_fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_records (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES staging_batches(id),
            line_number INTEGER NOT NULL,
            raw_fields TEXT NOT NULL,
            normalized_fields TEXT NOT NULL DEFAULT '{}',
            validation_errors TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            error_reason TEXT,
            UNIQUE(batch_id, line_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_entries (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            entry_type TEXT NOT NULL,
            canonical_name TEXT NOT NULL,
            normalized_key TEXT NOT NULL,
            attributes TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            last_matched_at TEXT,
            UNIQUE(organization_id, entry_type, normalized_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS match_decisions (
            staging_record_id TEXT NOT NULL REFERENCES staging_records(id),
            entity_type TEXT NOT NULL,
            resolution TEXT NOT NULL,
            resolved_entity_id TEXT,
            proposed_name TEXT,
            proposed_key TEXT,
            resolved_by TEXT NOT NULL,
            resolved_at TEXT NOT NULL,
            PRIMARY KEY (staging_record_id, entity_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quality_scores (
            staging_record_id TEXT PRIMARY KEY REFERENCES staging_records(id),
            completeness REAL NOT NULL,
            consistency REAL NOT NULL,
            validity REAL NOT NULL,
            timeliness REAL NOT NULL,
            uniqueness REAL NOT NULL,
            accuracy REAL NOT NULL,
            composite REAL NOT NULL,
            grade TEXT NOT NULL,
            scored_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conflict_queue (
            id TEXT PRIMARY KEY,
            staging_record_id TEXT NOT NULL REFERENCES staging_records(id),
            entity_type TEXT NOT NULL,
            input_name TEXT NOT NULL,
            candidates TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            resolved_at TEXT,
            UNIQUE(staging_record_id, entity_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commit_results (
            staging_record_id TEXT PRIMARY KEY REFERENCES staging_records(id),
            created_entity_ids TEXT NOT NULL,
            created_fact_ids TEXT NOT NULL,
            committed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS po_lines (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            staging_record_id TEXT NOT NULL UNIQUE,
            supplier_id TEXT NOT NULL REFERENCES catalog_entries(id),
            material_id TEXT NOT NULL REFERENCES catalog_entries(id),
            quantity REAL NOT NULL,
            unit_price REAL NOT NULL,
            total_price REAL,
            currency TEXT,
            order_date TEXT NOT NULL,
            delivery_date TEXT,
            po_number TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS price_observations (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            material_id TEXT NOT NULL REFERENCES catalog_entries(id),
            supplier_id TEXT NOT NULL REFERENCES catalog_entries(id),
            unit_price REAL NOT NULL,
            observed_date TEXT NOT NULL,
            staging_record_id TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_batch ON staging_records(batch_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflict_queue(status)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_prices_org ON price_observations(organization_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Ingestion tables initialized");
    Ok(())
}
