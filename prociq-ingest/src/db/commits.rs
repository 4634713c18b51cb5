//! Commit result persistence
//!
//! The existence check + insert pair runs inside the per-record
//! transaction, which is what makes replaying the commit engine a no-op.

use crate::models::CommitResult;
use prociq_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Whether a record already carries a commit result
pub async fn exists(conn: &mut SqliteConnection, staging_record_id: Uuid) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM commit_results WHERE staging_record_id = ?")
            .bind(staging_record_id.to_string())
            .fetch_one(conn)
            .await?;
    Ok(count > 0)
}

/// Write the commit receipt inside the caller's transaction
pub async fn insert(conn: &mut SqliteConnection, result: &CommitResult) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO commit_results (
            staging_record_id, created_entity_ids, created_fact_ids, committed_at
        ) VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(result.staging_record_id.to_string())
    .bind(ids_json(&result.created_entity_ids)?)
    .bind(ids_json(&result.created_fact_ids)?)
    .bind(result.committed_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

/// Commit receipts for one batch ("what was created" reporting)
pub async fn load_for_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Vec<CommitResult>> {
    let rows = sqlx::query(
        r#"
        SELECT c.* FROM commit_results c
        JOIN staging_records r ON r.id = c.staging_record_id
        WHERE r.batch_id = ?
        ORDER BY r.line_number
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(result_from_row).collect()
}

fn ids_json(ids: &[Uuid]) -> Result<String> {
    serde_json::to_string(ids).map_err(|e| Error::Parse(format!("id list: {}", e)))
}

fn result_from_row(row: sqlx::sqlite::SqliteRow) -> Result<CommitResult> {
    let record_id: String = row.get("staging_record_id");
    let entity_ids: String = row.get("created_entity_ids");
    let fact_ids: String = row.get("created_fact_ids");
    let committed_at: String = row.get("committed_at");

    Ok(CommitResult {
        staging_record_id: Uuid::parse_str(&record_id).map_err(|e| Error::Parse(e.to_string()))?,
        created_entity_ids: serde_json::from_str(&entity_ids)
            .map_err(|e| Error::Parse(format!("created_entity_ids: {}", e)))?,
        created_fact_ids: serde_json::from_str(&fact_ids)
            .map_err(|e| Error::Parse(format!("created_fact_ids: {}", e)))?,
        committed_at: super::batches::parse_timestamp(&committed_at)?,
    })
}
