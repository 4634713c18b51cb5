//! Staging batch persistence

use crate::models::{BatchStatus, StagingBatch};
use crate::pipeline::schema_mapper::MappingTemplate;
use chrono::{DateTime, Utc};
use prociq_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Insert a new batch, together with its optional saved mapping template
pub async fn insert_batch(
    pool: &SqlitePool,
    batch: &StagingBatch,
    template: Option<&MappingTemplate>,
) -> Result<()> {
    let template_json = template
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Parse(format!("template serialization: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO staging_batches (
            id, upload_ref, organization_id, upload_fingerprint,
            source_headers, mapping_template, status, created_at,
            completed_at, failure_reason
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id.to_string())
    .bind(&batch.upload_ref)
    .bind(batch.organization_id.to_string())
    .bind(&batch.upload_fingerprint)
    .bind(serde_json::to_string(&batch.source_headers).unwrap_or_else(|_| "[]".to_string()))
    .bind(template_json)
    .bind(batch.status.as_str())
    .bind(batch.created_at.to_rfc3339())
    .bind(batch.completed_at.map(|t| t.to_rfc3339()))
    .bind(&batch.failure_reason)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find an existing batch for a re-sent upload (idempotent creation)
pub async fn find_by_fingerprint(
    pool: &SqlitePool,
    organization_id: Uuid,
    fingerprint: &str,
) -> Result<Option<StagingBatch>> {
    let row = sqlx::query(
        "SELECT * FROM staging_batches WHERE organization_id = ? AND upload_fingerprint = ?",
    )
    .bind(organization_id.to_string())
    .bind(fingerprint)
    .fetch_optional(pool)
    .await?;

    row.map(batch_from_row).transpose()
}

/// Load one batch by id
pub async fn load_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Option<StagingBatch>> {
    let row = sqlx::query("SELECT * FROM staging_batches WHERE id = ?")
        .bind(batch_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(batch_from_row).transpose()
}

/// Load the saved mapping template attached to a batch, if any
pub async fn load_template(pool: &SqlitePool, batch_id: Uuid) -> Result<Option<MappingTemplate>> {
    let json: Option<Option<String>> =
        sqlx::query_scalar("SELECT mapping_template FROM staging_batches WHERE id = ?")
            .bind(batch_id.to_string())
            .fetch_optional(pool)
            .await?;

    match json.flatten() {
        Some(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| Error::Parse(format!("stored template: {}", e))),
        None => Ok(None),
    }
}

/// Persist the batch's current status, completion time, and failure reason
pub async fn update_batch_state(pool: &SqlitePool, batch: &StagingBatch) -> Result<()> {
    sqlx::query(
        "UPDATE staging_batches SET status = ?, completed_at = ?, failure_reason = ? WHERE id = ?",
    )
    .bind(batch.status.as_str())
    .bind(batch.completed_at.map(|t| t.to_rfc3339()))
    .bind(&batch.failure_reason)
    .bind(batch.id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

fn batch_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StagingBatch> {
    let id: String = row.get("id");
    let org: String = row.get("organization_id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let completed_at: Option<String> = row.get("completed_at");
    let headers_json: String = row.get("source_headers");

    Ok(StagingBatch {
        id: Uuid::parse_str(&id).map_err(|e| Error::Parse(e.to_string()))?,
        upload_ref: row.get("upload_ref"),
        organization_id: Uuid::parse_str(&org).map_err(|e| Error::Parse(e.to_string()))?,
        upload_fingerprint: row.get("upload_fingerprint"),
        source_headers: serde_json::from_str(&headers_json)
            .map_err(|e| Error::Parse(format!("source_headers: {}", e)))?,
        status: BatchStatus::parse(&status)?,
        created_at: parse_timestamp(&created_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
        failure_reason: row.get("failure_reason"),
    })
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Parse(format!("timestamp {}: {}", raw, e)))
}
