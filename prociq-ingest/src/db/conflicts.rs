//! Conflict queue persistence

use crate::models::{ConflictEntry, ConflictStatus, EntryType};
use crate::pipeline::types::MatchCandidate;
use chrono::Utc;
use prociq_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Enqueue a conflict. Reprocessing a record must not duplicate its open
/// entry, so an existing (record, type) row wins.
pub async fn enqueue(pool: &SqlitePool, entry: &ConflictEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO conflict_queue (
            id, staging_record_id, entity_type, input_name, candidates,
            status, created_at, resolved_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(staging_record_id, entity_type) DO NOTHING
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.staging_record_id.to_string())
    .bind(entry.entity_type.as_str())
    .bind(&entry.input_name)
    .bind(
        serde_json::to_string(&entry.candidates)
            .map_err(|e| Error::Parse(format!("candidates: {}", e)))?,
    )
    .bind(entry.status.as_str())
    .bind(entry.created_at.to_rfc3339())
    .bind(entry.resolved_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;
    Ok(())
}

/// Load one conflict entry
pub async fn load(pool: &SqlitePool, conflict_id: Uuid) -> Result<Option<ConflictEntry>> {
    let row = sqlx::query("SELECT * FROM conflict_queue WHERE id = ?")
        .bind(conflict_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(conflict_from_row).transpose()
}

/// All open conflicts for one organization, oldest first
pub async fn list_open_for_organization(
    pool: &SqlitePool,
    organization_id: Uuid,
) -> Result<Vec<ConflictEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT c.* FROM conflict_queue c
        JOIN staging_records r ON r.id = c.staging_record_id
        JOIN staging_batches b ON b.id = r.batch_id
        WHERE b.organization_id = ? AND c.status = 'open'
        ORDER BY c.created_at
        "#,
    )
    .bind(organization_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(conflict_from_row).collect()
}

/// Mark a conflict resolved
pub async fn mark_resolved(pool: &SqlitePool, conflict_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE conflict_queue SET status = 'resolved', resolved_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(conflict_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

fn conflict_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ConflictEntry> {
    let id: String = row.get("id");
    let record_id: String = row.get("staging_record_id");
    let entity_type: String = row.get("entity_type");
    let candidates: String = row.get("candidates");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let resolved_at: Option<String> = row.get("resolved_at");

    Ok(ConflictEntry {
        id: Uuid::parse_str(&id).map_err(|e| Error::Parse(e.to_string()))?,
        staging_record_id: Uuid::parse_str(&record_id).map_err(|e| Error::Parse(e.to_string()))?,
        entity_type: EntryType::parse(&entity_type)?,
        input_name: row.get("input_name"),
        candidates: serde_json::from_str::<Vec<MatchCandidate>>(&candidates)
            .map_err(|e| Error::Parse(format!("candidates: {}", e)))?,
        status: ConflictStatus::parse(&status)?,
        created_at: super::batches::parse_timestamp(&created_at)?,
        resolved_at: resolved_at
            .as_deref()
            .map(super::batches::parse_timestamp)
            .transpose()?,
    })
}
