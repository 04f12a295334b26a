pub mod dedupe;
pub mod ledger;
pub mod orchestrator;
pub mod proxy;
pub mod rate;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::engine::dedupe::{Deduplicator, ImportSummary};
use crate::engine::orchestrator::ScrapeOrchestrator;
use crate::error::AppError;
use crate::fetch::PageFetcher;
use crate::models::audit::AuditEvent;
use crate::models::candidate::CandidateRow;
use crate::models::source::SourceStatus;
use crate::store::Storage;

/// Tunables for scrape execution.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-page fetch deadline.
    pub page_timeout: Duration,
    /// Wall-clock cap on a whole run.
    pub run_timeout: Duration,
    /// Page failures in a row before the run is abandoned.
    pub max_consecutive_failures: u32,
    /// Auth-challenged runs in a row before the source is parked.
    pub auth_failure_threshold: u32,
    /// Scrapes executing in parallel across sources; further runs queue.
    pub max_concurrent_runs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(600),
            max_consecutive_failures: 3,
            auth_failure_threshold: 2,
            max_concurrent_runs: 4,
        }
    }
}

/// Handle bundling the stores and the scrape machinery, shared across the
/// HTTP layer and the scheduler.
pub struct Engine {
    pub storage: Storage,
    pub orchestrator: Arc<ScrapeOrchestrator>,
    dedupe: Deduplicator,
}

impl Engine {
    pub fn new(storage: Storage, fetcher: Arc<dyn PageFetcher>, config: EngineConfig) -> Self {
        Self {
            orchestrator: ScrapeOrchestrator::new(storage.clone(), fetcher, config),
            dedupe: Deduplicator::new(storage.candidates.clone()),
            storage,
        }
    }

    /// Bulk import against a source, applying the same dedup rules as
    /// scraped pages. Imports leave an audit trail but no run-history
    /// entry; they are not scrape runs.
    pub async fn import(
        &self,
        source_id: Uuid,
        rows: Vec<CandidateRow>,
        actor: &str,
    ) -> Result<ImportSummary, AppError> {
        let source = self.storage.sources.get(source_id).await?;
        if source.status == SourceStatus::Deprecated {
            return Err(AppError::BadRequest(format!(
                "Source '{}' is deprecated",
                source.name
            )));
        }

        let summary = self.dedupe.import(rows, source.platform, source_id).await?;

        let audit = self.storage.audit.clone();
        let event = AuditEvent::new(
            "candidates.imported",
            "candidate_source",
            source_id.to_string(),
            actor,
            serde_json::json!({
                "added": summary.added,
                "duplicates": summary.duplicates,
                "errors": summary.errors.len(),
            }),
        );
        tokio::spawn(async move {
            if let Err(e) = audit.record(&event).await {
                tracing::warn!("Failed to record audit event: {e}");
            }
        });

        Ok(summary)
    }
}
