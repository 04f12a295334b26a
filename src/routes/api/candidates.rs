use axum::Json;
use axum::extract::{Query, State};

use crate::error::AppError;
use crate::models::candidate::{CandidateFilters, CandidateRecord};
use crate::routes::AppState;

/// GET /api/v1/candidates
///
/// Pooled candidates, optionally filtered by originating source and a
/// free-text match on name/title/company, paginated.
pub async fn list(
    State(state): State<AppState>,
    Query(filters): Query<CandidateFilters>,
) -> Result<Json<Vec<CandidateRecord>>, AppError> {
    let candidates = state.engine.storage.candidates.list(&filters).await?;
    Ok(Json(candidates))
}
