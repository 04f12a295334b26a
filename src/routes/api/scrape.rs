use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::orchestrator::ScrapeStatus;
use crate::error::AppError;
use crate::models::run::RunTrigger;
use crate::routes::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    /// Who asked for the run; recorded on the run and in the audit trail.
    pub actor: Option<String>,
}

/// POST /api/v1/sources/{id}/scrape
///
/// Kick off a run. Returns 409 when one is already in flight for the
/// source, in this process or (via the persisted lease) in another.
pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<TriggerRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let actor = body
        .and_then(|Json(b)| b.actor)
        .unwrap_or_else(|| "api".to_string());

    let run_id = state
        .engine
        .orchestrator
        .start(id, RunTrigger::Api, &actor)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "started",
        "run_id": run_id,
        "source_id": id,
    })))
}

/// POST /api/v1/sources/{id}/scrape/stop
///
/// Request cancellation; the run finalizes as stopped after the page in
/// flight completes. 409 when nothing is running.
pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.engine.orchestrator.stop(id).await?;
    Ok(Json(serde_json::json!({
        "status": "stopping",
        "source_id": id,
    })))
}

/// GET /api/v1/sources/{id}/scrape
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScrapeStatus>, AppError> {
    let status = state.engine.orchestrator.status(id).await?;
    Ok(Json(status))
}
