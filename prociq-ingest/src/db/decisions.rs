//! Match decision persistence
//!
//! Keyed (staging_record_id, entity_type). The upsert exists for the two
//! sanctioned rewrites: a pending-review placeholder being finalized by a
//! human, and a created-new decision amended after losing the catalog
//! insert race.

use crate::models::{EntryType, MatchDecision, Resolution};
use prociq_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Write (or finalize) one decision
pub async fn upsert_decision(conn: &mut SqliteConnection, decision: &MatchDecision) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO match_decisions (
            staging_record_id, entity_type, resolution, resolved_entity_id,
            proposed_name, proposed_key, resolved_by, resolved_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(staging_record_id, entity_type) DO UPDATE SET
            resolution = excluded.resolution,
            resolved_entity_id = excluded.resolved_entity_id,
            proposed_name = excluded.proposed_name,
            proposed_key = excluded.proposed_key,
            resolved_by = excluded.resolved_by,
            resolved_at = excluded.resolved_at
        "#,
    )
    .bind(decision.staging_record_id.to_string())
    .bind(decision.entity_type.as_str())
    .bind(decision.resolution.as_str())
    .bind(decision.resolved_entity_id.map(|id| id.to_string()))
    .bind(&decision.proposed_name)
    .bind(&decision.proposed_key)
    .bind(&decision.resolved_by)
    .bind(decision.resolved_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

/// Load both decisions (supplier, material) for one record
pub async fn load_for_record(
    pool: &SqlitePool,
    staging_record_id: Uuid,
) -> Result<Vec<MatchDecision>> {
    let rows = sqlx::query("SELECT * FROM match_decisions WHERE staging_record_id = ?")
        .bind(staging_record_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(decision_from_row).collect()
}

fn decision_from_row(row: sqlx::sqlite::SqliteRow) -> Result<MatchDecision> {
    let record_id: String = row.get("staging_record_id");
    let entity_type: String = row.get("entity_type");
    let resolution: String = row.get("resolution");
    let entity_id: Option<String> = row.get("resolved_entity_id");
    let resolved_at: String = row.get("resolved_at");

    Ok(MatchDecision {
        staging_record_id: Uuid::parse_str(&record_id).map_err(|e| Error::Parse(e.to_string()))?,
        entity_type: EntryType::parse(&entity_type)?,
        resolution: Resolution::parse(&resolution)?,
        resolved_entity_id: entity_id
            .map(|s| Uuid::parse_str(&s).map_err(|e| Error::Parse(e.to_string())))
            .transpose()?,
        proposed_name: row.get("proposed_name"),
        proposed_key: row.get("proposed_key"),
        resolved_by: row.get("resolved_by"),
        resolved_at: super::batches::parse_timestamp(&resolved_at)?,
    })
}
