//! Batch Orchestrator
//!
//! Sequences the pipeline stages per batch: mapping + validation inline,
//! then entity resolution + quality scoring + commit fanned out over a
//! bounded worker pool with a per-record timeout. One batch runs at a
//! time per organization (an org-keyed async mutex); different
//! organizations' batches run concurrently.
//!
//! Record-level failures are contained at the record. Only snapshot-load
//! failures (infrastructure) fail the batch, and a failed batch is
//! retryable: the retry pass resets errored records and skips everything
//! already terminal.

use crate::db;
use crate::models::{
    BatchStatus, BatchSummary, ConflictEntry, EntryType, MatchDecision, RecordStatus,
    StagingBatch, StagingRecord,
};
use crate::pipeline::commit::{commit_record, material_attributes, supplier_attributes, CommitOutcome};
use crate::pipeline::quality::{record_duplicate_key, score_record, summarize, QualityContext};
use crate::pipeline::resolver::{CatalogSnapshot, ReferenceResolver};
use crate::pipeline::schema_mapper::{build_mapping, MappingTemplate};
use crate::pipeline::types::{
    CanonicalField, MappedRow, PipelineError, PipelineResult, ResolutionOutcome, ValidationOutcome,
};
use crate::pipeline::validator::validate_row;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use prociq_common::config::IngestConfig;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One upload handed over by the ingestion gateway
#[derive(Debug, Clone)]
pub struct BatchSubmission {
    pub organization_id: Uuid,
    pub upload_ref: String,
    /// Declared source column headers, in order
    pub headers: Vec<String>,
    /// Ordered raw rows, each an ordered list of (column, value) pairs
    pub rows: Vec<Vec<(String, String)>>,
    /// Optional saved mapping template
    pub template: Option<MappingTemplate>,
}

/// Orchestrates batch processing over the shared pool
pub struct Orchestrator {
    db: SqlitePool,
    config: Arc<IngestConfig>,
    org_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    cancel_tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(db: SqlitePool, config: Arc<IngestConfig>) -> Self {
        Self {
            db,
            config,
            org_locks: Mutex::new(HashMap::new()),
            cancel_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Stage an upload as a new batch, idempotently
    ///
    /// A re-sent upload (same organization, same content fingerprint)
    /// returns the already-existing batch instead of staging duplicate
    /// rows.
    pub async fn submit_batch(&self, submission: BatchSubmission) -> PipelineResult<StagingBatch> {
        let fingerprint = upload_fingerprint(&submission.upload_ref, &submission.rows);

        if let Some(existing) =
            db::batches::find_by_fingerprint(&self.db, submission.organization_id, &fingerprint)
                .await?
        {
            tracing::info!(
                batch_id = %existing.id,
                upload_ref = %submission.upload_ref,
                "Upload already staged, returning existing batch"
            );
            return Ok(existing);
        }

        let batch = StagingBatch::new(
            submission.organization_id,
            submission.upload_ref,
            fingerprint,
            submission.headers,
        );
        db::batches::insert_batch(&self.db, &batch, submission.template.as_ref()).await?;

        let records: Vec<StagingRecord> = submission
            .rows
            .into_iter()
            .enumerate()
            .map(|(idx, row)| StagingRecord::new(batch.id, idx as i64 + 1, row))
            .collect();
        db::records::insert_records(&self.db, &records).await?;

        tracing::info!(
            batch_id = %batch.id,
            organization_id = %batch.organization_id,
            records = records.len(),
            "Batch staged"
        );
        Ok(batch)
    }

    /// Run one full pipeline pass over a batch
    ///
    /// Valid entry states: pending (first run), failed (retry), or a
    /// mid-pipeline state left behind by a crash (resumed). Running a
    /// completed batch just returns its summary.
    pub async fn run_batch(&self, batch_id: Uuid) -> PipelineResult<BatchSummary> {
        let mut batch = db::batches::load_batch(&self.db, batch_id)
            .await?
            .ok_or_else(|| PipelineError::InvalidState(format!("unknown batch {}", batch_id)))?;

        // Per-organization serialization
        let lock = self.org_lock(batch.organization_id);
        let _guard = lock.lock().await;

        if batch.status == BatchStatus::Completed {
            return self.summary(batch_id).await;
        }

        let retry = batch.status == BatchStatus::Failed;
        if retry {
            let reset = db::records::reset_errored(&self.db, batch.id).await?;
            tracing::info!(
                batch_id = %batch.id,
                reset_records = reset,
                "Retrying failed batch"
            );
            batch.failure_reason = None;
        }

        let cancel_token = self.register_cancel_token(batch.id);
        let result = self.run_phases(&mut batch, &cancel_token).await;
        self.cancel_tokens
            .lock()
            .expect("cancel token map poisoned")
            .remove(&batch.id);

        match result {
            Ok(()) => self.summary(batch_id).await,
            Err(PipelineError::Cancelled) => {
                self.fail_batch(&mut batch, "cancelled by operator").await?;
                self.summary(batch_id).await
            }
            Err(e @ PipelineError::SnapshotLoad(_)) => {
                tracing::error!(batch_id = %batch.id, error = %e, "Batch infrastructure failure");
                self.fail_batch(&mut batch, &e.to_string()).await?;
                self.summary(batch_id).await
            }
            Err(e) => {
                self.fail_batch(&mut batch, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Request cancellation of a running batch (between records)
    pub fn cancel_batch(&self, batch_id: Uuid) -> bool {
        let tokens = self.cancel_tokens.lock().expect("cancel token map poisoned");
        match tokens.get(&batch_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(batch_id = %batch_id, "Batch cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Batch summary: status, per-status counts, quality aggregate
    pub async fn summary(&self, batch_id: Uuid) -> PipelineResult<BatchSummary> {
        let batch = db::batches::load_batch(&self.db, batch_id)
            .await?
            .ok_or_else(|| PipelineError::InvalidState(format!("unknown batch {}", batch_id)))?;
        let record_counts = db::records::count_by_status(&self.db, batch_id).await?;
        let scores = db::quality::load_for_batch(&self.db, batch_id).await?;
        let quality = if scores.is_empty() {
            None
        } else {
            Some(summarize(&scores))
        };
        Ok(BatchSummary {
            batch_id,
            status: batch.status,
            record_counts,
            quality,
            failure_reason: batch.failure_reason,
        })
    }

    // ------------------------------------------------------------------
    // Pipeline phases
    // ------------------------------------------------------------------

    async fn run_phases(
        &self,
        batch: &mut StagingBatch,
        cancel_token: &CancellationToken,
    ) -> PipelineResult<()> {
        // Phase 1: MAPPING — schema mapping + validation, inline
        self.advance(batch, BatchStatus::Mapping).await?;
        tracing::info!(batch_id = %batch.id, "Phase 1: MAPPING");

        let template = db::batches::load_template(&self.db, batch.id).await?;
        let mapping = build_mapping(&batch.source_headers, template.as_ref());

        let mut records = db::records::load_records(&self.db, batch.id).await?;
        let mut work: Vec<(StagingRecord, MappedRow, ValidationOutcome)> = Vec::new();

        for record in records.iter_mut() {
            if cancel_token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if record.status != RecordStatus::Pending {
                continue;
            }

            let mapped = mapping.apply(&record.raw_fields);
            let outcome = validate_row(&mapped);

            record.normalized_fields = mapped.to_name_map();
            record.validation_errors = outcome.errors.clone();
            if outcome.is_invalid() {
                record.status = RecordStatus::Invalid;
                tracing::debug!(
                    record_id = %record.id,
                    line = record.line_number,
                    errors = record.validation_errors.len(),
                    "Record invalid"
                );
            }
            db::records::update_after_mapping(&self.db, record).await?;
            work.push((record.clone(), mapped, outcome));
        }

        // Phase 2: RESOLVING — snapshot, then fan out resolution + scoring
        self.advance(batch, BatchStatus::Resolving).await?;
        tracing::info!(batch_id = %batch.id, records = work.len(), "Phase 2: RESOLVING");

        let snapshot = CatalogSnapshot::load(&self.db, batch.organization_id).await?;
        let resolver = ReferenceResolver::new(&snapshot, &self.config.pipeline);

        // Batch-local duplicate counts for the uniqueness dimension
        let mut batch_duplicates: HashMap<String, u32> = HashMap::new();
        for (_, _, outcome) in &work {
            if let Some(key) = record_duplicate_key(outcome) {
                *batch_duplicates.entry(key).or_insert(0) += 1;
            }
        }

        let ctx = QualityContext {
            snapshot: &snapshot,
            batch_duplicates: &batch_duplicates,
            config: &self.config.pipeline,
            today: Utc::now().date_naive(),
        };

        let timeout = Duration::from_secs(self.config.pipeline.record_timeout_secs);
        let worker_count = self.config.pipeline.worker_count;

        let resolve_results: Vec<PipelineResult<()>> = stream::iter(work.into_iter())
            .map(|(record, mapped, outcome)| {
                let resolver = &resolver;
                let ctx = &ctx;
                async move {
                    if cancel_token.is_cancelled() {
                        return Err(PipelineError::Cancelled);
                    }
                    match tokio::time::timeout(
                        timeout,
                        self.resolve_and_score(&record, &mapped, &outcome, resolver, ctx),
                    )
                    .await
                    {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(PipelineError::Cancelled)) => Err(PipelineError::Cancelled),
                        Ok(Err(e)) => {
                            // Contained at the record; the batch continues
                            self.mark_errored(record.id, &e).await;
                            Ok(())
                        }
                        Err(_) => {
                            self.mark_errored(
                                record.id,
                                &PipelineError::RecordTimeout(timeout.as_secs()),
                            )
                            .await;
                            Ok(())
                        }
                    }
                }
            })
            .buffer_unordered(worker_count)
            .collect()
            .await;

        for result in resolve_results {
            result?; // only Cancelled propagates; record errors are contained
        }

        // Phase 3: COMMITTING — per-record transactions, fanned out
        self.advance(batch, BatchStatus::Committing).await?;

        let resolved: Vec<StagingRecord> = db::records::load_records(&self.db, batch.id)
            .await?
            .into_iter()
            .filter(|r| r.status == RecordStatus::Resolved)
            .collect();
        tracing::info!(batch_id = %batch.id, records = resolved.len(), "Phase 3: COMMITTING");

        let batch_view = batch.clone();
        let commit_results: Vec<PipelineResult<bool>> = stream::iter(resolved.into_iter())
            .map(|record| {
                let batch = &batch_view;
                async move {
                    if cancel_token.is_cancelled() {
                        return Err(PipelineError::Cancelled);
                    }
                    match tokio::time::timeout(timeout, commit_record(&self.db, batch, &record))
                        .await
                    {
                        Ok(Ok(CommitOutcome::Committed(_))) => Ok(true),
                        Ok(Ok(CommitOutcome::AlreadyCommitted)) => {
                            // Replay after a crash: reconcile the status
                            db::records::set_status(
                                &self.db,
                                record.id,
                                RecordStatus::Committed,
                                None,
                            )
                            .await?;
                            Ok(true)
                        }
                        Ok(Err(e)) => {
                            self.mark_errored(record.id, &e).await;
                            Ok(false)
                        }
                        Err(_) => {
                            self.mark_errored(
                                record.id,
                                &PipelineError::RecordTimeout(timeout.as_secs()),
                            )
                            .await;
                            Ok(false)
                        }
                    }
                }
            })
            .buffer_unordered(worker_count)
            .collect()
            .await;

        let mut committed = 0usize;
        let mut failed = 0usize;
        for result in commit_results {
            if result? {
                committed += 1;
            } else {
                failed += 1;
            }
        }

        // Phase 4: COMPLETED — open conflicts may remain; they park their
        // records without blocking the batch
        self.advance(batch, BatchStatus::Completed).await?;
        tracing::info!(
            batch_id = %batch.id,
            committed,
            failed,
            "Batch pipeline pass complete"
        );
        Ok(())
    }

    /// Resolve both references of one valid record, enqueue conflicts,
    /// write decisions, and persist the quality score
    async fn resolve_and_score(
        &self,
        record: &StagingRecord,
        mapped: &MappedRow,
        outcome: &ValidationOutcome,
        resolver: &ReferenceResolver<'_>,
        ctx: &QualityContext<'_>,
    ) -> PipelineResult<()> {
        // Every record is scored, invalid ones included
        let score = score_record(record.id, mapped, outcome, ctx);
        db::quality::upsert_score(&self.db, &score).await?;

        if record.status == RecordStatus::Invalid {
            return Ok(());
        }

        let supplier_name = mapped
            .get_non_blank(CanonicalField::SupplierName)
            .unwrap_or_default()
            .to_string();
        let material_name = mapped
            .get_non_blank(CanonicalField::MaterialName)
            .unwrap_or_default()
            .to_string();

        // Decisions are immutable once written: a reprocessed record (retry
        // after an error) keeps them, including open review placeholders
        let existing = db::decisions::load_for_record(&self.db, record.id).await?;

        let mut needs_review = false;
        for (entity_type, input_name, aux) in [
            (
                EntryType::Supplier,
                supplier_name,
                supplier_attributes(&outcome.typed),
            ),
            (
                EntryType::Material,
                material_name,
                material_attributes(&outcome.typed),
            ),
        ] {
            if let Some(prior) = existing.iter().find(|d| d.entity_type == entity_type) {
                if !prior.resolution.is_final() {
                    needs_review = true;
                }
                continue;
            }

            let decision = match resolver.resolve(entity_type, &input_name, &aux) {
                ResolutionOutcome::AutoMatched { entry_id, .. } => {
                    MatchDecision::auto_matched(record.id, entity_type, entry_id)
                }
                ResolutionOutcome::CreatedNew {
                    canonical_name,
                    normalized_key,
                } => MatchDecision::created_new(
                    record.id,
                    entity_type,
                    canonical_name,
                    normalized_key,
                ),
                ResolutionOutcome::NeedsReview { candidates } => {
                    needs_review = true;
                    let conflict =
                        ConflictEntry::new(record.id, entity_type, input_name, candidates);
                    db::conflicts::enqueue(&self.db, &conflict).await?;
                    MatchDecision::pending_review(record.id, entity_type)
                }
            };
            let mut conn = self.db.acquire().await?;
            db::decisions::upsert_decision(&mut conn, &decision).await?;
        }

        let status = if needs_review {
            RecordStatus::NeedsReview
        } else {
            RecordStatus::Resolved
        };
        db::records::set_status(&self.db, record.id, status, None).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Advance the batch state if not already at or past it, and persist
    async fn advance(&self, batch: &mut StagingBatch, next: BatchStatus) -> PipelineResult<()> {
        if batch.status == next || !batch.status.can_transition_to(next) {
            // Crash-resumed batch already past this phase
            return Ok(());
        }
        batch
            .transition_to(next)
            .map_err(|e| PipelineError::InvalidState(e.to_string()))?;
        db::batches::update_batch_state(&self.db, batch).await?;
        Ok(())
    }

    async fn fail_batch(&self, batch: &mut StagingBatch, reason: &str) -> PipelineResult<()> {
        if batch.status.can_transition_to(BatchStatus::Failed) {
            batch
                .transition_to(BatchStatus::Failed)
                .map_err(|e| PipelineError::InvalidState(e.to_string()))?;
        }
        batch.failure_reason = Some(reason.to_string());
        db::batches::update_batch_state(&self.db, batch).await?;
        tracing::warn!(batch_id = %batch.id, reason, "Batch failed");
        Ok(())
    }

    async fn mark_errored(&self, record_id: Uuid, error: &PipelineError) {
        tracing::warn!(
            record_id = %record_id,
            error = %error,
            "Record errored (contained, batch continues)"
        );
        if let Err(e) =
            db::records::set_status(&self.db, record_id, RecordStatus::Errored, Some(&error.to_string()))
                .await
        {
            tracing::error!(record_id = %record_id, error = %e, "Failed to persist errored status");
        }
    }

    fn org_lock(&self, organization_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.org_locks
            .lock()
            .expect("org lock map poisoned")
            .entry(organization_id)
            .or_default()
            .clone()
    }

    fn register_cancel_token(&self, batch_id: Uuid) -> CancellationToken {
        self.cancel_tokens
            .lock()
            .expect("cancel token map poisoned")
            .entry(batch_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }
}

/// SHA-256 fingerprint over the upload reference and ordered row content
fn upload_fingerprint(upload_ref: &str, rows: &[Vec<(String, String)>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(upload_ref.as_bytes());
    hasher.update([0u8]);
    for row in rows {
        for (column, value) in row {
            hasher.update(column.as_bytes());
            hasher.update([1u8]);
            hasher.update(value.as_bytes());
            hasher.update([1u8]);
        }
        hasher.update([2u8]);
    }
    format!("{:x}", hasher.finalize())
}
