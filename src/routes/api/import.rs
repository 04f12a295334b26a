use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dedupe::ImportSummary;
use crate::error::AppError;
use crate::models::candidate::CandidateRow;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub source_id: Uuid,
    pub candidates: Vec<CandidateRow>,
    pub actor: Option<String>,
}

/// POST /api/v1/candidates/import
///
/// Batch ingest candidates from an external tool. Applies the same
/// dedup rules as scraped pages and reports per-row errors without
/// aborting the batch.
pub async fn import(
    State(state): State<AppState>,
    Json(input): Json<ImportRequest>,
) -> Result<Json<ImportSummary>, AppError> {
    let actor = input.actor.as_deref().unwrap_or("api");
    let summary = state
        .engine
        .import(input.source_id, input.candidates, actor)
        .await?;
    Ok(Json(summary))
}
