//! Batch ingest, status, and reporting handlers

use crate::error::{ApiError, ApiResult};
use crate::models::{BatchStatus, BatchSummary};
use crate::pipeline::schema_mapper::MappingTemplate;
use crate::pipeline::types::CanonicalField;
use crate::pipeline::BatchSubmission;
use crate::{db, AppState};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Ingestion gateway contract: one upload
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub organization_id: Uuid,
    pub upload_ref: String,
    /// Detected/declared source column headers, in order
    pub headers: Vec<String>,
    /// Ordered rows; each row an ordered list of [column, value] pairs
    pub rows: Vec<Vec<(String, String)>>,
    /// Optional saved mapping template
    pub template: Option<TemplateDto>,
}

/// Saved mapping template as transported over the API
#[derive(Debug, Deserialize)]
pub struct TemplateDto {
    pub name: String,
    /// source column → canonical field name
    pub columns: BTreeMap<String, String>,
}

impl TemplateDto {
    fn into_template(self) -> Result<MappingTemplate, ApiError> {
        let mut columns = BTreeMap::new();
        for (column, field_name) in self.columns {
            let field = CanonicalField::parse(&field_name).ok_or_else(|| {
                ApiError::BadRequest(format!("unknown canonical field: {}", field_name))
            })?;
            columns.insert(column, field);
        }
        Ok(MappingTemplate {
            name: self.name,
            columns,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub records: usize,
}

/// POST /ingest/batches
///
/// Stages the upload (idempotently) and starts the pipeline pass in the
/// background; progress is observed via the batch summary endpoint.
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    if request.upload_ref.trim().is_empty() {
        return Err(ApiError::BadRequest("upload_ref must not be empty".to_string()));
    }

    let template = request.template.map(TemplateDto::into_template).transpose()?;
    let records = request.rows.len();

    let submission = BatchSubmission {
        organization_id: request.organization_id,
        upload_ref: request.upload_ref,
        headers: request.headers,
        rows: request.rows,
        template,
    };

    let batch = state.orchestrator.submit_batch(submission).await?;

    // Completed batches (idempotent re-send) are not re-run
    if !batch.status.is_terminal() {
        let orchestrator = state.orchestrator.clone();
        let batch_id = batch.id;
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run_batch(batch_id).await {
                tracing::error!(batch_id = %batch_id, error = %e, "Batch run failed");
            }
        });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            batch_id: batch.id,
            status: batch.status,
            records,
        }),
    ))
}

/// GET /ingest/batches/{batch_id}
pub async fn batch_summary(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<BatchSummary>> {
    ensure_batch_exists(&state, batch_id).await?;
    let summary = state.orchestrator.summary(batch_id).await?;
    Ok(Json(summary))
}

/// One committed record for "what was created" displays
#[derive(Debug, Serialize)]
pub struct CommitSummary {
    pub staging_record_id: Uuid,
    pub created_entity_ids: Vec<Uuid>,
    pub created_fact_ids: Vec<Uuid>,
    /// References that matched existing catalog entries instead of
    /// creating new ones
    pub matched_entity_count: usize,
    pub committed_at: DateTime<Utc>,
}

/// GET /ingest/batches/{batch_id}/commits
pub async fn batch_commits(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<Vec<CommitSummary>>> {
    ensure_batch_exists(&state, batch_id).await?;
    let results = db::commits::load_for_batch(&state.db, batch_id).await?;

    const REFERENCES_PER_RECORD: usize = 2; // supplier + material
    let summaries = results
        .into_iter()
        .map(|r| CommitSummary {
            matched_entity_count: REFERENCES_PER_RECORD.saturating_sub(r.created_entity_ids.len()),
            staging_record_id: r.staging_record_id,
            created_entity_ids: r.created_entity_ids,
            created_fact_ids: r.created_fact_ids,
            committed_at: r.committed_at,
        })
        .collect();
    Ok(Json(summaries))
}

/// POST /ingest/batches/{batch_id}/retry
pub async fn retry_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let batch = db::batches::load_batch(&state.db, batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("batch {}", batch_id)))?;

    if batch.status != BatchStatus::Failed {
        return Err(ApiError::Conflict(format!(
            "batch {} is {}, only failed batches can be retried",
            batch_id,
            batch.status.as_str()
        )));
    }

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_batch(batch_id).await {
            tracing::error!(batch_id = %batch_id, error = %e, "Batch retry failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            batch_id,
            status: batch.status,
            records: 0,
        }),
    ))
}

/// POST /ingest/batches/{batch_id}/cancel
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    ensure_batch_exists(&state, batch_id).await?;
    if state.orchestrator.cancel_batch(batch_id) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::Conflict(format!(
            "batch {} is not currently running",
            batch_id
        )))
    }
}

async fn ensure_batch_exists(state: &AppState, batch_id: Uuid) -> ApiResult<()> {
    db::batches::load_batch(&state.db, batch_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| ApiError::NotFound(format!("batch {}", batch_id)))
}
