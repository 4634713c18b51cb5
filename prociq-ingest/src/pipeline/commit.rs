//! Commit Engine
//!
//! Persists one record's resolved entities and derived facts inside a
//! per-record transaction. A record's failure never touches its siblings,
//! and replaying an already-committed record is a no-op thanks to the
//! commit-result existence check.
//!
//! The createdNew path inserts the catalog entry with no conflict clause:
//! a unique-constraint violation means a concurrent upload created the
//! same entity first, and the engine recovers by re-reading the winning
//! row and auto-matching against it. That violation is the concurrency
//! mechanism, not an error.

use crate::db;
use crate::models::{
    CatalogEntry, CommitResult, EntryAttributes, EntryType, MatchDecision, PoLine,
    PriceObservation, Resolution, StagingBatch, StagingRecord,
};
use crate::pipeline::types::{
    CanonicalField, FieldValue, MappedRow, PipelineError, PipelineResult,
};
use crate::pipeline::validator::validate_row;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Outcome of one commit attempt
#[derive(Debug)]
pub enum CommitOutcome {
    /// Facts persisted in this call
    Committed(CommitResult),
    /// A commit result already existed; nothing was written
    AlreadyCommitted,
}

/// Auxiliary attributes for a new supplier entry, from the typed row
pub fn supplier_attributes(typed: &BTreeMap<CanonicalField, FieldValue>) -> EntryAttributes {
    EntryAttributes {
        tax_id: typed
            .get(&CanonicalField::SupplierTaxId)
            .and_then(|v| v.as_text())
            .map(str::to_string),
        ..Default::default()
    }
}

/// Auxiliary attributes for a new material entry, from the typed row
pub fn material_attributes(typed: &BTreeMap<CanonicalField, FieldValue>) -> EntryAttributes {
    EntryAttributes {
        material_code: typed
            .get(&CanonicalField::MaterialCode)
            .and_then(|v| v.as_text())
            .map(str::to_string),
        unit: typed
            .get(&CanonicalField::Unit)
            .and_then(|v| v.as_text())
            .map(str::to_string),
        ..Default::default()
    }
}

/// Commit one record with finalized decisions
pub async fn commit_record(
    pool: &SqlitePool,
    batch: &StagingBatch,
    record: &StagingRecord,
) -> PipelineResult<CommitOutcome> {
    // Re-derive typed values from the persisted mapping (the validator is
    // deterministic, so this matches the resolve-time view)
    let row = MappedRow::from_name_map(&record.normalized_fields);
    let outcome = validate_row(&row);
    if outcome.is_invalid() {
        return Err(PipelineError::InvalidState(format!(
            "record {} is invalid and cannot commit",
            record.id
        )));
    }
    let typed = outcome.typed;

    let decisions = db::decisions::load_for_record(pool, record.id)
        .await
        .map_err(|e| PipelineError::Commit(e.to_string()))?;
    let supplier_decision = final_decision(&decisions, EntryType::Supplier, record.id)?;
    let material_decision = final_decision(&decisions, EntryType::Material, record.id)?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| PipelineError::Commit(e.to_string()))?;

    // Idempotency anchor: re-running over a committed record is a no-op
    if db::commits::exists(&mut tx, record.id)
        .await
        .map_err(|e| PipelineError::Commit(e.to_string()))?
    {
        tracing::debug!(record_id = %record.id, "Commit result exists, skipping");
        return Ok(CommitOutcome::AlreadyCommitted);
    }

    let mut created_entity_ids: Vec<Uuid> = Vec::new();

    let supplier_id = materialize_entity(
        &mut tx,
        batch,
        supplier_decision,
        supplier_attributes(&typed),
        &mut created_entity_ids,
    )
    .await?;
    let material_id = materialize_entity(
        &mut tx,
        batch,
        material_decision,
        material_attributes(&typed),
        &mut created_entity_ids,
    )
    .await?;

    // Derived facts
    let quantity = number(&typed, CanonicalField::Quantity, record.id)?;
    let unit_price = number(&typed, CanonicalField::UnitPrice, record.id)?;
    let order_date = typed
        .get(&CanonicalField::OrderDate)
        .and_then(|v| v.as_date())
        .ok_or_else(|| {
            PipelineError::InvalidState(format!("record {} missing order date", record.id))
        })?;

    let po_line = PoLine {
        id: Uuid::new_v4(),
        organization_id: batch.organization_id,
        staging_record_id: record.id,
        supplier_id,
        material_id,
        quantity,
        unit_price,
        total_price: typed
            .get(&CanonicalField::TotalPrice)
            .and_then(|v| v.as_number()),
        currency: typed
            .get(&CanonicalField::Currency)
            .and_then(|v| v.as_text())
            .map(str::to_string),
        order_date,
        delivery_date: typed
            .get(&CanonicalField::DeliveryDate)
            .and_then(|v| v.as_date()),
        po_number: typed
            .get(&CanonicalField::PoNumber)
            .and_then(|v| v.as_text())
            .map(str::to_string),
    };
    let price_obs = PriceObservation {
        id: Uuid::new_v4(),
        organization_id: batch.organization_id,
        material_id,
        supplier_id,
        unit_price,
        observed_date: order_date,
        staging_record_id: record.id,
    };

    db::facts::insert_po_line(&mut tx, &po_line)
        .await
        .map_err(|e| PipelineError::Commit(e.to_string()))?;
    db::facts::insert_price_observation(&mut tx, &price_obs)
        .await
        .map_err(|e| PipelineError::Commit(e.to_string()))?;

    let result = CommitResult {
        staging_record_id: record.id,
        created_entity_ids,
        created_fact_ids: vec![po_line.id, price_obs.id],
        committed_at: Utc::now(),
    };
    db::commits::insert(&mut tx, &result)
        .await
        .map_err(|e| PipelineError::Commit(e.to_string()))?;

    sqlx::query("UPDATE staging_records SET status = 'committed', error_reason = NULL WHERE id = ?")
        .bind(record.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| PipelineError::Commit(e.to_string()))?;

    tx.commit()
        .await
        .map_err(|e| PipelineError::Commit(e.to_string()))?;

    tracing::info!(
        record_id = %record.id,
        batch_id = %batch.id,
        created_entities = result.created_entity_ids.len(),
        "Record committed"
    );

    Ok(CommitOutcome::Committed(result))
}

/// Turn a final decision into a concrete catalog entry id, creating the
/// entry when the decision proposes one
async fn materialize_entity(
    tx: &mut SqliteConnection,
    batch: &StagingBatch,
    decision: &MatchDecision,
    attributes: EntryAttributes,
    created_entity_ids: &mut Vec<Uuid>,
) -> PipelineResult<Uuid> {
    match decision.resolution {
        Resolution::AutoMatched | Resolution::ManuallyMatched => {
            let entry_id = decision.resolved_entity_id.ok_or_else(|| {
                PipelineError::InvalidState(format!(
                    "{} decision for record {} has no entity id",
                    decision.entity_type.as_str(),
                    decision.staging_record_id
                ))
            })?;
            db::catalog::touch_last_matched(tx, entry_id)
                .await
                .map_err(|e| PipelineError::Commit(e.to_string()))?;
            Ok(entry_id)
        }
        Resolution::CreatedNew => {
            // Already materialized on an earlier pass (idempotent replay)
            if let Some(entry_id) = decision.resolved_entity_id {
                return Ok(entry_id);
            }

            let (name, key) = match (&decision.proposed_name, &decision.proposed_key) {
                (Some(name), Some(key)) => (name.clone(), key.clone()),
                _ => {
                    return Err(PipelineError::InvalidState(format!(
                        "created-new decision for record {} lacks a proposal",
                        decision.staging_record_id
                    )))
                }
            };

            let entry = CatalogEntry::new(
                batch.organization_id,
                decision.entity_type,
                name,
                key.clone(),
                attributes,
            );

            match db::catalog::insert_entry(tx, &entry).await {
                Ok(()) => {
                    created_entity_ids.push(entry.id);
                    let mut amended = decision.clone();
                    amended.resolved_entity_id = Some(entry.id);
                    db::decisions::upsert_decision(tx, &amended)
                        .await
                        .map_err(|e| PipelineError::Commit(e.to_string()))?;
                    tracing::debug!(
                        record_id = %decision.staging_record_id,
                        entry_id = %entry.id,
                        entry_type = decision.entity_type.as_str(),
                        "New catalog entry created"
                    );
                    Ok(entry.id)
                }
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    // A concurrent upload created the same entity first:
                    // re-read the winner and match against it
                    let winner = db::catalog::find_by_key(
                        tx,
                        batch.organization_id,
                        decision.entity_type,
                        &key,
                    )
                    .await
                    .map_err(|e| PipelineError::Commit(e.to_string()))?
                    .ok_or_else(|| {
                        PipelineError::Commit(format!(
                            "unique violation on {} but no row found for key {}",
                            decision.entity_type.as_str(),
                            key
                        ))
                    })?;

                    tracing::info!(
                        record_id = %decision.staging_record_id,
                        entry_id = %winner.id,
                        key = %key,
                        "Catalog race lost, auto-matching against existing entry"
                    );

                    let amended = MatchDecision {
                        resolution: Resolution::AutoMatched,
                        resolved_entity_id: Some(winner.id),
                        proposed_name: None,
                        proposed_key: None,
                        ..decision.clone()
                    };
                    db::decisions::upsert_decision(tx, &amended)
                        .await
                        .map_err(|e| PipelineError::Commit(e.to_string()))?;
                    db::catalog::touch_last_matched(tx, winner.id)
                        .await
                        .map_err(|e| PipelineError::Commit(e.to_string()))?;
                    Ok(winner.id)
                }
                Err(e) => Err(PipelineError::Commit(e.to_string())),
            }
        }
        Resolution::PendingReview => Err(PipelineError::InvalidState(format!(
            "record {} still awaits review for {}",
            decision.staging_record_id,
            decision.entity_type.as_str()
        ))),
    }
}

fn final_decision<'a>(
    decisions: &'a [MatchDecision],
    entity_type: EntryType,
    record_id: Uuid,
) -> PipelineResult<&'a MatchDecision> {
    let decision = decisions
        .iter()
        .find(|d| d.entity_type == entity_type)
        .ok_or_else(|| {
            PipelineError::InvalidState(format!(
                "record {} has no {} decision",
                record_id,
                entity_type.as_str()
            ))
        })?;
    if !decision.resolution.is_final() {
        return Err(PipelineError::InvalidState(format!(
            "record {} {} decision is not final",
            record_id,
            entity_type.as_str()
        )));
    }
    Ok(decision)
}

fn number(
    typed: &BTreeMap<CanonicalField, FieldValue>,
    field: CanonicalField,
    record_id: Uuid,
) -> PipelineResult<f64> {
    typed
        .get(&field)
        .and_then(|v| v.as_number())
        .ok_or_else(|| {
            PipelineError::InvalidState(format!("record {} missing {}", record_id, field))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{batches, decisions, init_ingest_schema, records};
    use crate::models::{RecordStatus, StagingBatch, StagingRecord};

    async fn setup() -> (SqlitePool, StagingBatch) {
        let pool = prociq_common::db::init_memory_pool().await.unwrap();
        init_ingest_schema(&pool).await.unwrap();
        let batch = StagingBatch::new(
            Uuid::new_v4(),
            "upload".to_string(),
            "fp".to_string(),
            vec![],
        );
        batches::insert_batch(&pool, &batch, None).await.unwrap();
        (pool, batch)
    }

    fn staged_record(batch_id: Uuid, line: i64) -> StagingRecord {
        let mut record = StagingRecord::new(batch_id, line, vec![]);
        for (field, value) in [
            ("supplier_name", "O'Reilly & Sons"),
            ("material_name", "Copper Pipe"),
            ("quantity", "10"),
            ("unit_price", "5.00"),
            ("order_date", "2026-07-01"),
        ] {
            record
                .normalized_fields
                .insert(field.to_string(), value.to_string());
        }
        record
    }

    async fn stage_with_new_decisions(
        pool: &SqlitePool,
        batch: &StagingBatch,
        line: i64,
    ) -> StagingRecord {
        let record = staged_record(batch.id, line);
        records::insert_records(pool, &[record.clone()]).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        decisions::upsert_decision(
            &mut conn,
            &MatchDecision::created_new(
                record.id,
                EntryType::Supplier,
                "O'Reilly & Sons".to_string(),
                "oreilly sons".to_string(),
            ),
        )
        .await
        .unwrap();
        decisions::upsert_decision(
            &mut conn,
            &MatchDecision::created_new(
                record.id,
                EntryType::Material,
                "Copper Pipe".to_string(),
                "copper pipe".to_string(),
            ),
        )
        .await
        .unwrap();
        record
    }

    #[tokio::test]
    async fn test_commit_creates_entities_and_facts() {
        let (pool, batch) = setup().await;
        let record = stage_with_new_decisions(&pool, &batch, 1).await;

        let outcome = commit_record(&pool, &batch, &record).await.unwrap();
        let result = match outcome {
            CommitOutcome::Committed(r) => r,
            other => panic!("expected commit, got {:?}", other),
        };
        assert_eq!(result.created_entity_ids.len(), 2);
        assert_eq!(result.created_fact_ids.len(), 2);

        let loaded = records::load_record(&pool, record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Committed);

        let entries = db::catalog::load_for_organization(&pool, batch.organization_id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.normalized_key == "oreilly sons"));
    }

    #[tokio::test]
    async fn test_recommit_is_noop() {
        let (pool, batch) = setup().await;
        let record = stage_with_new_decisions(&pool, &batch, 1).await;

        let first = commit_record(&pool, &batch, &record).await.unwrap();
        assert!(matches!(first, CommitOutcome::Committed(_)));

        let second = commit_record(&pool, &batch, &record).await.unwrap();
        assert!(matches!(second, CommitOutcome::AlreadyCommitted));

        // Still exactly one entity per reference and one fact pair
        let entries = db::catalog::load_for_organization(&pool, batch.organization_id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        let commits = db::commits::load_for_batch(&pool, batch.id).await.unwrap();
        assert_eq!(commits.len(), 1);
    }

    #[tokio::test]
    async fn test_catalog_race_recovers_to_auto_match() {
        let (pool, batch) = setup().await;
        let record = stage_with_new_decisions(&pool, &batch, 1).await;

        // Simulate the concurrent winner: the supplier already exists by
        // the time this record commits
        let existing = CatalogEntry::new(
            batch.organization_id,
            EntryType::Supplier,
            "OReilly Sons".to_string(),
            "oreilly sons".to_string(),
            EntryAttributes::default(),
        );
        let mut conn = pool.acquire().await.unwrap();
        db::catalog::insert_entry(&mut conn, &existing).await.unwrap();
        drop(conn);

        let outcome = commit_record(&pool, &batch, &record).await.unwrap();
        let result = match outcome {
            CommitOutcome::Committed(r) => r,
            other => panic!("expected commit, got {:?}", other),
        };
        // Only the material was created; the supplier resolved to the
        // pre-existing entry
        assert_eq!(result.created_entity_ids.len(), 1);

        let decisions = db::decisions::load_for_record(&pool, record.id).await.unwrap();
        let supplier = decisions
            .iter()
            .find(|d| d.entity_type == EntryType::Supplier)
            .unwrap();
        assert_eq!(supplier.resolution, Resolution::AutoMatched);
        assert_eq!(supplier.resolved_entity_id, Some(existing.id));

        // No duplicate catalog entry
        let entries = db::catalog::load_for_organization(&pool, batch.organization_id)
            .await
            .unwrap();
        let suppliers: Vec<_> = entries
            .iter()
            .filter(|e| e.entry_type == EntryType::Supplier)
            .collect();
        assert_eq!(suppliers.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_review_cannot_commit() {
        let (pool, batch) = setup().await;
        let record = staged_record(batch.id, 1);
        records::insert_records(&pool, &[record.clone()]).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        decisions::upsert_decision(
            &mut conn,
            &MatchDecision::created_new(
                record.id,
                EntryType::Supplier,
                "X".to_string(),
                "x".to_string(),
            ),
        )
        .await
        .unwrap();
        decisions::upsert_decision(
            &mut conn,
            &MatchDecision::pending_review(record.id, EntryType::Material),
        )
        .await
        .unwrap();
        drop(conn);

        let err = commit_record(&pool, &batch, &record).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));

        // Nothing was half-committed
        let entries = db::catalog::load_for_organization(&pool, batch.organization_id)
            .await
            .unwrap();
        assert!(entries.is_empty());
    }
}
