use std::sync::Arc;

use chrono::Utc;

use crate::error::AppError;
use crate::models::run::{RunStatus, ScrapeRun};
use crate::models::source::{CandidateSource, RUN_HISTORY_LIMIT};
use crate::store::{SourceStore, with_retry};

/// Appends bounded run-history entries to a source and recomputes rollup
/// statistics. The success rate is derived from the retained window, so
/// runs older than the last RUN_HISTORY_LIMIT age out of the rate.
#[derive(Clone)]
pub struct RunLedger {
    sources: Arc<dyn SourceStore>,
}

impl RunLedger {
    pub fn new(sources: Arc<dyn SourceStore>) -> Self {
        Self { sources }
    }

    /// Accumulate one successfully processed page into the run.
    pub fn record_page(run: &mut ScrapeRun, found: u32, added: u32, duplicates: u32) {
        run.pages_scraped += 1;
        run.candidates_found += found;
        run.candidates_added += added;
        run.duplicates_skipped += duplicates;
    }

    /// Freeze the run, append it to the source's history (newest first,
    /// oldest dropped beyond the retention window) and recompute stats.
    pub async fn complete(
        &self,
        source: &mut CandidateSource,
        mut run: ScrapeRun,
        status: RunStatus,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        run.status = status;
        run.finished_at = Some(now);

        let first_error = run.first_error().map(|e| e.message.clone());

        source.run_history.insert(0, run.clone());
        source.run_history.truncate(RUN_HISTORY_LIMIT);

        let stats = &mut source.stats;
        stats.total_runs += 1;
        stats.total_candidates_found += u64::from(run.candidates_found);
        stats.total_candidates_added += u64::from(run.candidates_added);
        stats.last_run_at = Some(now);
        match status {
            RunStatus::Completed => stats.last_success_at = Some(now),
            RunStatus::Failed => {
                stats.last_error_at = Some(now);
                stats.last_error_message = first_error;
            }
            RunStatus::Stopped | RunStatus::Running => {}
        }

        let completed = source
            .run_history
            .iter()
            .filter(|r| r.status == RunStatus::Completed)
            .count();
        stats.success_rate =
            ((completed as f64 / source.run_history.len() as f64) * 100.0).round() as u32;

        with_retry("save run history", || {
            self.sources
                .save_run_history(source.id, &source.run_history, &source.stats)
        })
        .await
    }
}
