use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::scheduler::next_run_after;
use crate::error::AppError;
use crate::models::audit::AuditEvent;
use crate::models::proxy::ProxyPoolState;
use crate::models::source::{
    CandidateSource, Platform, RateLimitPolicy, ScheduleConfig, ScrapingConfig, SourceStatus,
};
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSource {
    pub name: String,
    pub platform: Platform,
    #[serde(default)]
    pub config: ScrapingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitPolicy,
    #[serde(default)]
    pub proxies: ProxyPoolState,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSource {
    pub name: Option<String>,
    pub status: Option<SourceStatus>,
    pub config: Option<ScrapingConfig>,
    pub rate_limit: Option<RateLimitPolicy>,
    pub proxies: Option<ProxyPoolState>,
    pub schedule: Option<ScheduleConfig>,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<CandidateSource>>, AppError> {
    let sources = state.engine.storage.sources.list().await?;
    Ok(Json(sources))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CandidateSource>, AppError> {
    let source = state.engine.storage.sources.get(id).await?;
    Ok(Json(source))
}

pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<CreateSource>,
) -> Result<(StatusCode, Json<CandidateSource>), AppError> {
    if input.name.trim().is_empty() {
        return Err(AppError::BadRequest("Source name is required".to_string()));
    }

    let mut source = CandidateSource::new(input.name, input.platform);
    source.config = input.config;
    source.rate_limit = input.rate_limit;
    source.proxies = input.proxies;
    source.schedule = input.schedule;
    source.schedule.next_run_at = next_run_after(&source.schedule, Utc::now());

    state.engine.storage.sources.insert(&source).await?;
    audit(&state, "source.created", &source);

    Ok((StatusCode::CREATED, Json(source)))
}

/// Partial update. Schedule or status edits recompute the next due
/// instant; deactivation is a status change, there is no hard delete.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateSource>,
) -> Result<Json<CandidateSource>, AppError> {
    let mut source = state.engine.storage.sources.get(id).await?;

    if let Some(name) = input.name {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("Source name is required".to_string()));
        }
        source.name = name;
    }
    if let Some(status) = input.status {
        source.status = status;
    }
    if let Some(config) = input.config {
        source.config = config;
    }
    if let Some(rate_limit) = input.rate_limit {
        source.rate_limit = rate_limit;
    }
    if let Some(proxies) = input.proxies {
        source.proxies = proxies;
    }
    if let Some(schedule) = input.schedule {
        source.schedule = schedule;
    }
    source.schedule.next_run_at = if source.status == SourceStatus::Active {
        next_run_after(&source.schedule, Utc::now())
    } else {
        None
    };
    source.updated_at = Utc::now();

    state.engine.storage.sources.update(&source).await?;
    audit(&state, "source.updated", &source);

    Ok(Json(source))
}

fn audit(state: &AppState, action: &str, source: &CandidateSource) {
    let store = state.engine.storage.audit.clone();
    let event = AuditEvent::new(
        action,
        "candidate_source",
        source.id.to_string(),
        "api",
        serde_json::json!({
            "name": source.name,
            "platform": source.platform,
            "status": source.status,
        }),
    );
    tokio::spawn(async move {
        if let Err(e) = store.record(&event).await {
            tracing::warn!("Failed to record audit event: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::engine::{Engine, EngineConfig};
    use crate::fetch::HttpFetcher;
    use crate::store::Storage;

    fn state() -> AppState {
        let engine = Engine::new(
            Storage::memory(),
            Arc::new(HttpFetcher::default()),
            EngineConfig::default(),
        );
        AppState {
            engine: Arc::new(engine),
            api_token_hash: None,
        }
    }

    #[tokio::test]
    async fn create_computes_the_first_due_instant() {
        let state = state();
        let input = CreateSource {
            name: "board".into(),
            platform: Platform::Jobboard,
            config: ScrapingConfig::default(),
            rate_limit: RateLimitPolicy::default(),
            proxies: ProxyPoolState::default(),
            schedule: ScheduleConfig {
                is_enabled: true,
                ..Default::default()
            },
        };
        let (code, Json(source)) = create(State(state.clone()), Json(input)).await.unwrap();
        assert_eq!(code, StatusCode::CREATED);
        assert!(source.schedule.next_run_at.is_some());

        let stored = state.engine.storage.sources.get(source.id).await.unwrap();
        assert_eq!(stored.name, "board");
    }

    #[tokio::test]
    async fn pausing_clears_the_due_instant() {
        let state = state();
        let input = CreateSource {
            name: "board".into(),
            platform: Platform::Jobboard,
            config: ScrapingConfig::default(),
            rate_limit: RateLimitPolicy::default(),
            proxies: ProxyPoolState::default(),
            schedule: ScheduleConfig {
                is_enabled: true,
                ..Default::default()
            },
        };
        let (_, Json(source)) = create(State(state.clone()), Json(input)).await.unwrap();

        let Json(updated) = update(
            State(state),
            Path(source.id),
            Json(UpdateSource {
                status: Some(SourceStatus::Paused),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.status, SourceStatus::Paused);
        assert!(updated.schedule.next_run_at.is_none());
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let state = state();
        let input = CreateSource {
            name: "   ".into(),
            platform: Platform::Linkedin,
            config: ScrapingConfig::default(),
            rate_limit: RateLimitPolicy::default(),
            proxies: ProxyPoolState::default(),
            schedule: ScheduleConfig::default(),
        };
        let result = create(State(state), Json(input)).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
