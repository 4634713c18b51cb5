//! Staging record persistence
//!
//! Records are inserted once at batch creation and only mutated by
//! pipeline stages afterwards; they are never deleted.

use crate::models::{RecordStatus, StagingRecord};
use prociq_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Insert all records of a batch in one transaction
pub async fn insert_records(pool: &SqlitePool, records: &[StagingRecord]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for record in records {
        sqlx::query(
            r#"
            INSERT INTO staging_records (
                id, batch_id, line_number, raw_fields, normalized_fields,
                validation_errors, status, error_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.batch_id.to_string())
        .bind(record.line_number)
        .bind(json(&record.raw_fields)?)
        .bind(json(&record.normalized_fields)?)
        .bind(json(&record.validation_errors)?)
        .bind(record.status.as_str())
        .bind(&record.error_reason)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Load all records of a batch, ordered by line number
pub async fn load_records(pool: &SqlitePool, batch_id: Uuid) -> Result<Vec<StagingRecord>> {
    let rows = sqlx::query("SELECT * FROM staging_records WHERE batch_id = ? ORDER BY line_number")
        .bind(batch_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(record_from_row).collect()
}

/// Load one record by id
pub async fn load_record(pool: &SqlitePool, record_id: Uuid) -> Result<Option<StagingRecord>> {
    let row = sqlx::query("SELECT * FROM staging_records WHERE id = ?")
        .bind(record_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(record_from_row).transpose()
}

/// Persist the mapping + validation outcome for one record
pub async fn update_after_mapping(pool: &SqlitePool, record: &StagingRecord) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE staging_records
        SET normalized_fields = ?, validation_errors = ?, status = ?
        WHERE id = ?
        "#,
    )
    .bind(json(&record.normalized_fields)?)
    .bind(json(&record.validation_errors)?)
    .bind(record.status.as_str())
    .bind(record.id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Set a record's status (and error reason, cleared when None)
pub async fn set_status(
    pool: &SqlitePool,
    record_id: Uuid,
    status: RecordStatus,
    error_reason: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE staging_records SET status = ?, error_reason = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(error_reason)
        .bind(record_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Reset errored records to pending for a retry pass
pub async fn reset_errored(pool: &SqlitePool, batch_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE staging_records SET status = 'pending', error_reason = NULL \
         WHERE batch_id = ? AND status = 'errored'",
    )
    .bind(batch_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Per-status record counts for the batch summary
pub async fn count_by_status(
    pool: &SqlitePool,
    batch_id: Uuid,
) -> Result<BTreeMap<String, i64>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM staging_records WHERE batch_id = ? GROUP BY status",
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

fn json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Parse(format!("JSON encode: {}", e)))
}

fn record_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StagingRecord> {
    let id: String = row.get("id");
    let batch_id: String = row.get("batch_id");
    let raw_fields: String = row.get("raw_fields");
    let normalized: String = row.get("normalized_fields");
    let errors: String = row.get("validation_errors");
    let status: String = row.get("status");

    Ok(StagingRecord {
        id: Uuid::parse_str(&id).map_err(|e| Error::Parse(e.to_string()))?,
        batch_id: Uuid::parse_str(&batch_id).map_err(|e| Error::Parse(e.to_string()))?,
        line_number: row.get("line_number"),
        raw_fields: serde_json::from_str(&raw_fields)
            .map_err(|e| Error::Parse(format!("raw_fields: {}", e)))?,
        normalized_fields: serde_json::from_str(&normalized)
            .map_err(|e| Error::Parse(format!("normalized_fields: {}", e)))?,
        validation_errors: serde_json::from_str(&errors)
            .map_err(|e| Error::Parse(format!("validation_errors: {}", e)))?,
        status: RecordStatus::parse(&status)?,
        error_reason: row.get("error_reason"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{batches, init_ingest_schema};
    use crate::models::StagingBatch;

    async fn pool_with_batch() -> (SqlitePool, StagingBatch) {
        let pool = prociq_common::db::init_memory_pool().await.unwrap();
        init_ingest_schema(&pool).await.unwrap();
        let batch = StagingBatch::new(Uuid::new_v4(), "u".to_string(), "fp".to_string(), vec![]);
        batches::insert_batch(&pool, &batch, None).await.unwrap();
        (pool, batch)
    }

    fn record(batch_id: Uuid, line: i64) -> StagingRecord {
        StagingRecord::new(
            batch_id,
            line,
            vec![("Vendor".to_string(), "Acme".to_string())],
        )
    }

    #[tokio::test]
    async fn test_insert_and_load_records() {
        let (pool, batch) = pool_with_batch().await;
        let records = vec![record(batch.id, 1), record(batch.id, 2)];
        insert_records(&pool, &records).await.unwrap();

        let loaded = load_records(&pool, batch.id).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].line_number, 1);
        assert_eq!(loaded[0].raw_fields[0].1, "Acme");
        assert_eq!(loaded[0].status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn test_status_update_and_counts() {
        let (pool, batch) = pool_with_batch().await;
        let records = vec![record(batch.id, 1), record(batch.id, 2), record(batch.id, 3)];
        insert_records(&pool, &records).await.unwrap();

        set_status(&pool, records[0].id, RecordStatus::Committed, None)
            .await
            .unwrap();
        set_status(&pool, records[1].id, RecordStatus::Errored, Some("store error"))
            .await
            .unwrap();

        let counts = count_by_status(&pool, batch.id).await.unwrap();
        assert_eq!(counts.get("committed"), Some(&1));
        assert_eq!(counts.get("errored"), Some(&1));
        assert_eq!(counts.get("pending"), Some(&1));
    }

    #[tokio::test]
    async fn test_reset_errored_for_retry() {
        let (pool, batch) = pool_with_batch().await;
        let records = vec![record(batch.id, 1), record(batch.id, 2)];
        insert_records(&pool, &records).await.unwrap();

        set_status(&pool, records[0].id, RecordStatus::Errored, Some("timeout"))
            .await
            .unwrap();
        set_status(&pool, records[1].id, RecordStatus::Committed, None)
            .await
            .unwrap();

        let reset = reset_errored(&pool, batch.id).await.unwrap();
        assert_eq!(reset, 1);

        let loaded = load_record(&pool, records[0].id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Pending);
        assert!(loaded.error_reason.is_none());
        // Committed records are untouched
        let committed = load_record(&pool, records[1].id).await.unwrap().unwrap();
        assert_eq!(committed.status, RecordStatus::Committed);
    }

    #[tokio::test]
    async fn test_duplicate_line_number_rejected() {
        let (pool, batch) = pool_with_batch().await;
        insert_records(&pool, &[record(batch.id, 1)]).await.unwrap();
        assert!(insert_records(&pool, &[record(batch.id, 1)]).await.is_err());
    }
}
