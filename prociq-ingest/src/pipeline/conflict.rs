//! Conflict resolution flow
//!
//! The resolver emits queue entries instead of blocking on a human; a
//! resolution event arriving here writes the final decision and re-injects
//! the record into the commit engine. Pipeline liveness never depends on
//! review latency: partial batches complete while conflicts stay open.

use crate::db;
use crate::models::{ConflictResolution, ConflictStatus, EntryType, MatchDecision, RecordStatus};
use crate::pipeline::commit::commit_record;
use crate::pipeline::resolver::normalize_name;
use crate::pipeline::types::{PipelineError, PipelineResult};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Apply a human decision to one open conflict entry
///
/// Writes the final `MatchDecision`, marks the entry resolved, and — once
/// the record has no references left in review — commits the record.
/// Returns the record's resulting status.
pub async fn resolve_conflict(
    pool: &SqlitePool,
    conflict_id: Uuid,
    resolution: ConflictResolution,
    resolved_by: &str,
) -> PipelineResult<RecordStatus> {
    let conflict = db::conflicts::load(pool, conflict_id)
        .await?
        .ok_or_else(|| PipelineError::InvalidState(format!("unknown conflict {}", conflict_id)))?;

    if conflict.status == ConflictStatus::Resolved {
        return Err(PipelineError::InvalidState(format!(
            "conflict {} is already resolved",
            conflict_id
        )));
    }

    let record = db::records::load_record(pool, conflict.staging_record_id)
        .await?
        .ok_or_else(|| {
            PipelineError::InvalidState(format!(
                "conflict {} references missing record",
                conflict_id
            ))
        })?;
    let batch = db::batches::load_batch(pool, record.batch_id)
        .await?
        .ok_or_else(|| {
            PipelineError::InvalidState(format!("record {} references missing batch", record.id))
        })?;

    let decision = match resolution {
        ConflictResolution::UseExisting { catalog_entry_id } => {
            let entry = db::catalog::load_entry(pool, catalog_entry_id)
                .await?
                .ok_or_else(|| {
                    PipelineError::InvalidState(format!(
                        "chosen catalog entry {} does not exist",
                        catalog_entry_id
                    ))
                })?;
            if entry.organization_id != batch.organization_id
                || entry.entry_type != conflict.entity_type
            {
                return Err(PipelineError::InvalidState(format!(
                    "chosen catalog entry {} does not fit conflict {}",
                    catalog_entry_id, conflict_id
                )));
            }
            MatchDecision::manually_matched(
                record.id,
                conflict.entity_type,
                catalog_entry_id,
                resolved_by.to_string(),
            )
        }
        ConflictResolution::CreateNew => {
            let mut decision = MatchDecision::created_new(
                record.id,
                conflict.entity_type,
                conflict.input_name.trim().to_string(),
                normalize_name(&conflict.input_name),
            );
            decision.resolved_by = resolved_by.to_string();
            decision
        }
    };

    let mut conn = pool.acquire().await?;
    db::decisions::upsert_decision(&mut conn, &decision).await?;
    drop(conn);

    db::conflicts::mark_resolved(pool, conflict.id).await?;

    tracing::info!(
        conflict_id = %conflict.id,
        record_id = %record.id,
        entity_type = conflict.entity_type.as_str(),
        resolution = decision.resolution.as_str(),
        resolved_by,
        "Conflict resolved"
    );

    // Commit only once every reference is out of review
    let decisions = db::decisions::load_for_record(pool, record.id).await?;
    let all_final = decisions.len() == reference_count()
        && decisions.iter().all(|d| d.resolution.is_final());
    if !all_final {
        tracing::debug!(
            record_id = %record.id,
            "References still in review, record stays parked"
        );
        return Ok(RecordStatus::NeedsReview);
    }

    db::records::set_status(pool, record.id, RecordStatus::Resolved, None).await?;

    match commit_record(pool, &batch, &record).await {
        Ok(_) => Ok(RecordStatus::Committed),
        Err(e) => {
            tracing::warn!(
                record_id = %record.id,
                error = %e,
                "Commit after conflict resolution failed"
            );
            db::records::set_status(
                pool,
                record.id,
                RecordStatus::Errored,
                Some(&e.to_string()),
            )
            .await?;
            Ok(RecordStatus::Errored)
        }
    }
}

/// References resolved per record: supplier and material
fn reference_count() -> usize {
    [EntryType::Supplier, EntryType::Material].len()
}
