//! Quality score persistence

use crate::models::{Grade, QualityDimensions, QualityScore};
use chrono::Utc;
use prociq_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Write a record's quality score (replacing any prior score on
/// reprocessing)
pub async fn upsert_score(pool: &SqlitePool, score: &QualityScore) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO quality_scores (
            staging_record_id, completeness, consistency, validity,
            timeliness, uniqueness, accuracy, composite, grade, scored_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(staging_record_id) DO UPDATE SET
            completeness = excluded.completeness,
            consistency = excluded.consistency,
            validity = excluded.validity,
            timeliness = excluded.timeliness,
            uniqueness = excluded.uniqueness,
            accuracy = excluded.accuracy,
            composite = excluded.composite,
            grade = excluded.grade,
            scored_at = excluded.scored_at
        "#,
    )
    .bind(score.staging_record_id.to_string())
    .bind(score.dimensions.completeness)
    .bind(score.dimensions.consistency)
    .bind(score.dimensions.validity)
    .bind(score.dimensions.timeliness)
    .bind(score.dimensions.uniqueness)
    .bind(score.dimensions.accuracy)
    .bind(score.composite)
    .bind(score.grade.as_str())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Load all scores for one batch
pub async fn load_for_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Vec<QualityScore>> {
    let rows = sqlx::query(
        r#"
        SELECT q.* FROM quality_scores q
        JOIN staging_records r ON r.id = q.staging_record_id
        WHERE r.batch_id = ?
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(score_from_row).collect()
}

fn score_from_row(row: sqlx::sqlite::SqliteRow) -> Result<QualityScore> {
    let record_id: String = row.get("staging_record_id");
    let grade: String = row.get("grade");

    Ok(QualityScore {
        staging_record_id: Uuid::parse_str(&record_id).map_err(|e| Error::Parse(e.to_string()))?,
        dimensions: QualityDimensions {
            completeness: row.get("completeness"),
            consistency: row.get("consistency"),
            validity: row.get("validity"),
            timeliness: row.get("timeliness"),
            uniqueness: row.get("uniqueness"),
            accuracy: row.get("accuracy"),
        },
        composite: row.get("composite"),
        grade: Grade::parse(&grade)?,
    })
}
