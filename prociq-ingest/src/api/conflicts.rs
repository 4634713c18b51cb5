//! Conflict queue handlers

use crate::error::{ApiError, ApiResult};
use crate::models::{ConflictEntry, ConflictResolution, RecordStatus};
use crate::pipeline::conflict::resolve_conflict;
use crate::{db, AppState};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub organization_id: Uuid,
}

/// GET /conflicts?organization_id=...
pub async fn list_open(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ConflictEntry>>> {
    let entries =
        db::conflicts::list_open_for_organization(&state.db, query.organization_id).await?;
    Ok(Json(entries))
}

/// Resolution submission: exactly one of the two options
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub chosen_catalog_entry_id: Option<Uuid>,
    #[serde(default)]
    pub create_new: bool,
    /// Reviewer identifier for the decision audit trail
    pub resolved_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub conflict_id: Uuid,
    pub record_status: RecordStatus,
}

/// POST /conflicts/{conflict_id}/resolve
pub async fn resolve(
    State(state): State<AppState>,
    Path(conflict_id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<ResolveResponse>> {
    let resolution = match (request.chosen_catalog_entry_id, request.create_new) {
        (Some(catalog_entry_id), false) => ConflictResolution::UseExisting { catalog_entry_id },
        (None, true) => ConflictResolution::CreateNew,
        _ => {
            return Err(ApiError::BadRequest(
                "provide either chosen_catalog_entry_id or create_new".to_string(),
            ))
        }
    };
    let resolved_by = request.resolved_by.unwrap_or_else(|| "reviewer".to_string());

    db::conflicts::load(&state.db, conflict_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("conflict {}", conflict_id)))?;

    let record_status =
        resolve_conflict(&state.db, conflict_id, resolution, &resolved_by).await?;

    Ok(Json(ResolveResponse {
        conflict_id,
        record_status,
    }))
}
