pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::audit::AuditEvent;
use crate::models::candidate::{CandidateFilters, CandidateRecord};
use crate::models::proxy::ProxyPoolState;
use crate::models::run::ScrapeRun;
use crate::models::source::{CandidateSource, SourceStats, SourceStatus};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Duplicate,
}

#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn insert(&self, source: &CandidateSource) -> Result<(), AppError>;
    async fn get(&self, id: Uuid) -> Result<CandidateSource, AppError>;
    async fn list(&self) -> Result<Vec<CandidateSource>, AppError>;
    /// Full-document save, for operator edits through the API.
    async fn update(&self, source: &CandidateSource) -> Result<(), AppError>;
    /// Sources eligible for a scheduled run: active, schedule enabled,
    /// next_run_at in the past.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<CandidateSource>, AppError>;
    async fn set_next_run(&self, id: Uuid, when: Option<DateTime<Utc>>) -> Result<(), AppError>;
    async fn set_status(&self, id: Uuid, status: SourceStatus) -> Result<(), AppError>;
    async fn save_proxy_state(&self, id: Uuid, state: &ProxyPoolState) -> Result<(), AppError>;
    async fn save_run_history(
        &self,
        id: Uuid,
        history: &[ScrapeRun],
        stats: &SourceStats,
    ) -> Result<(), AppError>;
    /// Conditional single-flight acquisition: succeeds only when no lease
    /// is held or the held lease has expired. Owner is the run id.
    async fn acquire_lease(
        &self,
        id: Uuid,
        owner: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    /// Release only if still owned; a stale owner is a no-op.
    async fn release_lease(&self, id: Uuid, owner: Uuid) -> Result<(), AppError>;
    /// Clear leases whose expiry has passed, returning the affected source
    /// ids. Used for crash recovery at startup.
    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError>;
    async fn ping(&self) -> Result<(), AppError>;
}

#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Insert unless a record already holds one of the row's natural keys
    /// (profile URL, email, phone). Atomic per key.
    async fn insert_if_absent(&self, record: &CandidateRecord) -> Result<InsertOutcome, AppError>;
    async fn find_by_profile_url(&self, url: &str) -> Result<Option<CandidateRecord>, AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<CandidateRecord>, AppError>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<CandidateRecord>, AppError>;
    async fn find_by_name_company(
        &self,
        name: &str,
        company: &str,
    ) -> Result<Option<CandidateRecord>, AppError>;
    async fn list(&self, filters: &CandidateFilters) -> Result<Vec<CandidateRecord>, AppError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), AppError>;
}

/// Bundle of store handles passed through the engine.
#[derive(Clone)]
pub struct Storage {
    pub sources: Arc<dyn SourceStore>,
    pub candidates: Arc<dyn CandidateStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl Storage {
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(postgres::PgStore::new(pool));
        Self {
            sources: store.clone(),
            candidates: store.clone(),
            audit: store,
        }
    }

    pub fn memory() -> Self {
        let store = Arc::new(memory::MemoryStore::default());
        Self {
            sources: store.clone(),
            candidates: store.clone(),
            audit: store,
        }
    }
}

/// Retry transient storage failures with exponential backoff. Non-database
/// errors are returned immediately.
pub async fn with_retry<T, F, Fut>(op: &str, mut f: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(AppError::Database(e)) if attempt < RETRY_ATTEMPTS => {
                tracing::warn!("{op} failed (attempt {attempt}/{RETRY_ATTEMPTS}), retrying: {e}");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
