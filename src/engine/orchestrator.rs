use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore, watch};
use uuid::Uuid;

use crate::adapters::{PlatformAdapter, adapter_for};
use crate::engine::EngineConfig;
use crate::engine::dedupe::{Deduplicator, UpsertOutcome};
use crate::engine::ledger::RunLedger;
use crate::engine::proxy::ProxyPool;
use crate::engine::rate::RateGovernor;
use crate::engine::scheduler::next_run_after;
use crate::error::AppError;
use crate::fetch::PageFetcher;
use crate::models::audit::AuditEvent;
use crate::models::run::{RunStatus, RunTrigger, ScrapeRun};
use crate::models::source::{CandidateSource, SourceStats, SourceStatus};
use crate::store::Storage;

const AUTH_REQUIRED: &str = "authentication required";

struct ActiveRun {
    run_id: Uuid,
    trigger: RunTrigger,
    started_at: DateTime<Utc>,
    cancel: watch::Sender<bool>,
}

#[derive(Debug, Serialize)]
pub struct ActiveRunSummary {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ScrapeStatus {
    pub is_running: bool,
    pub active: Option<ActiveRunSummary>,
    pub last_run: Option<ScrapeRun>,
    pub stats: SourceStats,
}

/// Top-level coordinator for scrape runs. Holds the per-source
/// single-flight state (in-process active map plus a persisted lease) and
/// drives pagination through the platform adapter, applying the rate
/// governor, proxy pool and deduplicator, and committing every outcome to
/// the run ledger.
pub struct ScrapeOrchestrator {
    storage: Storage,
    fetcher: Arc<dyn PageFetcher>,
    rate: RateGovernor,
    proxies: ProxyPool,
    dedupe: Deduplicator,
    ledger: RunLedger,
    config: EngineConfig,
    active: Mutex<HashMap<Uuid, ActiveRun>>,
    /// Bounds scrapes executing in parallel across sources.
    permits: Semaphore,
}

impl ScrapeOrchestrator {
    pub fn new(storage: Storage, fetcher: Arc<dyn PageFetcher>, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            proxies: ProxyPool::new(storage.sources.clone()),
            dedupe: Deduplicator::new(storage.candidates.clone()),
            ledger: RunLedger::new(storage.sources.clone()),
            rate: RateGovernor::new(),
            permits: Semaphore::new(config.max_concurrent_runs),
            storage,
            fetcher,
            config,
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Start a run for the source, rejecting when one is already in
    /// flight. Configuration problems (missing source, unsupported
    /// platform, deprecated source) fail fast before any run is created.
    pub async fn start(
        self: &Arc<Self>,
        source_id: Uuid,
        trigger: RunTrigger,
        actor: &str,
    ) -> Result<Uuid, AppError> {
        let source = self.storage.sources.get(source_id).await?;
        if source.status == SourceStatus::Deprecated {
            return Err(AppError::BadRequest(format!(
                "Source '{}' is deprecated",
                source.name
            )));
        }
        let adapter = adapter_for(source.platform)
            .ok_or_else(|| AppError::UnsupportedPlatform(source.platform.as_str().to_string()))?;

        let run = ScrapeRun::begin(trigger, actor);
        let run_id = run.id;
        let cancel_rx = {
            let mut active = self.active.lock().await;
            if active.contains_key(&source_id) {
                return Err(AppError::AlreadyRunning(source_id));
            }
            // The persisted lease covers multi-process deployments; its
            // owner is the run id and it expires on its own, so a crashed
            // worker cannot strand the source.
            let expires_at = Utc::now() + lease_ttl(&self.config);
            if !self
                .storage
                .sources
                .acquire_lease(source_id, run_id, expires_at)
                .await?
            {
                return Err(AppError::AlreadyRunning(source_id));
            }
            let (tx, rx) = watch::channel(false);
            active.insert(
                source_id,
                ActiveRun {
                    run_id,
                    trigger,
                    started_at: run.started_at,
                    cancel: tx,
                },
            );
            rx
        };

        tracing::info!(
            source_id = %source_id,
            run_id = %run_id,
            platform = adapter.platform().as_str(),
            trigger = trigger.as_str(),
            actor,
            "Scrape run starting"
        );

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.execute(source, adapter, run, cancel_rx).await;
        });
        Ok(run_id)
    }

    /// Request cancellation of the active run. The loop stops at the next
    /// safe point, after the in-flight page completes.
    pub async fn stop(&self, source_id: Uuid) -> Result<(), AppError> {
        let active = self.active.lock().await;
        match active.get(&source_id) {
            Some(run) => {
                tracing::info!(source_id = %source_id, run_id = %run.run_id, "Stop requested");
                let _ = run.cancel.send(true);
                Ok(())
            }
            None => Err(AppError::NoActiveScrape(source_id)),
        }
    }

    pub async fn status(&self, source_id: Uuid) -> Result<ScrapeStatus, AppError> {
        let source = self.storage.sources.get(source_id).await?;
        let active = self.active.lock().await.get(&source_id).map(|run| {
            ActiveRunSummary {
                run_id: run.run_id,
                trigger: run.trigger,
                started_at: run.started_at,
            }
        });
        Ok(ScrapeStatus {
            is_running: active.is_some(),
            active,
            last_run: source.last_run().cloned(),
            stats: source.stats,
        })
    }

    /// Startup recovery: clear leases left behind by a crashed process and
    /// finalize a failed ledger entry for each, so no source stays
    /// "running" forever and every attempt leaves a trace.
    pub async fn recover_stale(&self) -> Result<u32, AppError> {
        let stale = self.storage.sources.reap_expired_leases(Utc::now()).await?;
        let mut recovered = 0;
        for source_id in stale {
            let mut source = match self.storage.sources.get(source_id).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(source_id = %source_id, "Stale lease on unloadable source: {e}");
                    continue;
                }
            };
            let mut run = ScrapeRun::begin(RunTrigger::Manual, "recovery");
            run.push_error("run interrupted by process restart", None);
            if let Err(e) = self
                .ledger
                .complete(&mut source, run, RunStatus::Failed)
                .await
            {
                tracing::error!(source_id = %source_id, "Failed to finalize stale run: {e}");
                continue;
            }
            recovered += 1;
        }
        if recovered > 0 {
            tracing::warn!("Recovered {recovered} stale scrape runs");
        }
        Ok(recovered)
    }

    async fn execute(
        self: Arc<Self>,
        mut source: CandidateSource,
        adapter: Box<dyn PlatformAdapter>,
        mut run: ScrapeRun,
        mut cancel: watch::Receiver<bool>,
    ) {
        // Queued behind the worker pool bound; the run timeout starts
        // once a permit is held.
        let _permit = self.permits.acquire().await.ok();
        let status = self
            .run_pages(&mut source, adapter.as_ref(), &mut run, &mut cancel)
            .await;
        self.finalize(&mut source, run, status).await;
    }

    async fn run_pages(
        &self,
        source: &mut CandidateSource,
        adapter: &dyn PlatformAdapter,
        run: &mut ScrapeRun,
        cancel: &mut watch::Receiver<bool>,
    ) -> RunStatus {
        let deadline = tokio::time::Instant::now() + self.config.run_timeout;
        let mut consecutive_failures = 0u32;

        for page in 1..=source.config.max_pages {
            if *cancel.borrow() {
                return RunStatus::Stopped;
            }
            if tokio::time::Instant::now() >= deadline {
                run.push_error("run timeout exceeded", None);
                return RunStatus::Failed;
            }

            // The rate floor can be hours long under per-hour/day caps, so
            // the wait itself is bounded by the run deadline.
            match tokio::time::timeout_at(
                deadline,
                self.rate.wait(source.id, &source.rate_limit, cancel),
            )
            .await
            {
                Err(_) => {
                    run.push_error("run timeout exceeded", None);
                    return RunStatus::Failed;
                }
                Ok(false) => return RunStatus::Stopped,
                Ok(true) => {}
            }

            let proxy = match self.proxies.next(source).await {
                Ok(p) => p,
                Err(e) => {
                    run.push_error(format!("proxy selection failed: {e}"), None);
                    return RunStatus::Failed;
                }
            };
            if proxy.is_none() && source.proxies.require_proxy {
                run.push_error("no active proxy available and source requires proxy egress", None);
                return RunStatus::Failed;
            }
            if let Some(p) = &proxy {
                run.proxy_used = Some(p.key());
            }

            let request = adapter.build_page_request(&source.config, page);
            let fetch_started = tokio::time::Instant::now();
            let fetched = tokio::time::timeout(
                self.config.page_timeout,
                self.fetcher.fetch(&request, proxy.as_ref()),
            )
            .await;
            let latency_ms = fetch_started.elapsed().as_millis() as u64;

            let content = match fetched {
                Err(_) => {
                    run.push_error(format!("page {page} fetch timed out"), Some(request.url));
                    if let Some(p) = &proxy {
                        self.proxies.record(source, &p.key(), false, latency_ms).await;
                    }
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        run.push_error("too many consecutive page failures", None);
                        return RunStatus::Failed;
                    }
                    continue;
                }
                Ok(Err(e)) => {
                    run.push_error(format!("page {page} failed: {e}"), Some(request.url));
                    if let Some(p) = &proxy {
                        self.proxies.record(source, &p.key(), false, latency_ms).await;
                    }
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        run.push_error("too many consecutive page failures", None);
                        return RunStatus::Failed;
                    }
                    continue;
                }
                Ok(Ok(content)) => content,
            };

            if let Some(p) = &proxy {
                self.proxies.record(source, &p.key(), true, latency_ms).await;
            }

            // A login/verification demand is terminal for the whole run;
            // the scheduler will not retry it on its own.
            if adapter.has_auth_challenge(&content) {
                run.push_error(AUTH_REQUIRED, Some(request.url));
                return RunStatus::Failed;
            }

            let rows = adapter.extract_rows(&content);
            let exhausted = rows.is_empty();
            let mut found = 0u32;
            let mut added = 0u32;
            let mut duplicates = 0u32;
            for row in rows {
                found += 1;
                match self.dedupe.upsert(row, source.platform, source.id).await {
                    Ok(UpsertOutcome::Created(_)) => added += 1,
                    Ok(UpsertOutcome::Duplicate(_)) => duplicates += 1,
                    Err(e) => {
                        run.push_error(format!("failed to persist candidate: {e}"), None);
                    }
                }
            }
            RunLedger::record_page(run, found, added, duplicates);
            consecutive_failures = 0;

            tracing::debug!(
                source_id = %source.id,
                page,
                found,
                added,
                duplicates,
                "Page processed"
            );

            if exhausted {
                tracing::info!(source_id = %source.id, page, "Results exhausted early");
                return RunStatus::Completed;
            }
        }

        RunStatus::Completed
    }

    /// Terminal path for every run: commit the ledger entry, release the
    /// single-flight state, recompute the next due instant and emit the
    /// audit event. Runs even when the loop failed or was stopped.
    async fn finalize(&self, source: &mut CandidateSource, run: ScrapeRun, status: RunStatus) {
        let run_id = run.id;
        let actor = run.actor.clone();
        let summary = serde_json::json!({
            "run_id": run_id,
            "status": status,
            "pages_scraped": run.pages_scraped,
            "candidates_found": run.candidates_found,
            "candidates_added": run.candidates_added,
            "duplicates_skipped": run.duplicates_skipped,
            "errors": run.errors.len(),
        });

        if let Err(e) = self.ledger.complete(source, run, status).await {
            tracing::error!(source_id = %source.id, run_id = %run_id, "Failed to commit run ledger entry: {e}");
        }

        if let Err(e) = self.storage.sources.release_lease(source.id, run_id).await {
            tracing::warn!(source_id = %source.id, "Failed to release run lease: {e}");
        }
        self.active.lock().await.remove(&source.id);

        let next = next_run_after(&source.schedule, Utc::now());
        if let Err(e) = self.storage.sources.set_next_run(source.id, next).await {
            tracing::warn!(source_id = %source.id, "Failed to update next run: {e}");
        }

        // Repeated authentication challenges need operator intervention
        // (refreshed credentials); park the source instead of letting the
        // schedule hammer the login wall.
        if consecutive_auth_failures(source) >= self.config.auth_failure_threshold {
            tracing::warn!(source_id = %source.id, "Repeated authentication challenges, marking source errored");
            if let Err(e) = self
                .storage
                .sources
                .set_status(source.id, SourceStatus::Error)
                .await
            {
                tracing::warn!(source_id = %source.id, "Failed to update source status: {e}");
            }
        }

        let audit = self.storage.audit.clone();
        let event = AuditEvent::new(
            "scrape.completed",
            "candidate_source",
            source.id.to_string(),
            actor,
            summary,
        );
        tokio::spawn(async move {
            if let Err(e) = audit.record(&event).await {
                tracing::warn!("Failed to record audit event: {e}");
            }
        });

        tracing::info!(
            source_id = %source.id,
            run_id = %run_id,
            status = ?status,
            "Scrape run finished"
        );
    }
}

fn lease_ttl(config: &EngineConfig) -> ChronoDuration {
    ChronoDuration::from_std(config.run_timeout + config.page_timeout)
        .unwrap_or_else(|_| ChronoDuration::minutes(15))
}

/// Leading run-history entries that failed on an authentication challenge.
fn consecutive_auth_failures(source: &CandidateSource) -> u32 {
    source
        .run_history
        .iter()
        .take_while(|run| {
            run.status == RunStatus::Failed
                && run.errors.iter().any(|e| e.message == AUTH_REQUIRED)
        })
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use crate::fetch::PageRequest;
    use crate::models::proxy::ProxyEndpoint;
    use crate::models::source::Platform;

    fn test_config() -> EngineConfig {
        EngineConfig {
            page_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(600),
            max_consecutive_failures: 3,
            auth_failure_threshold: 2,
            max_concurrent_runs: 4,
        }
    }

    fn quick_source() -> CandidateSource {
        let mut source = CandidateSource::new("test-source", Platform::Jobboard);
        source.rate_limit.base_delay_ms = 1000;
        source.rate_limit.randomize = false;
        source.rate_limit.jitter_ms = 0;
        source.config.max_pages = 10;
        source
    }

    fn page_with_rows(names: &[&str]) -> Value {
        json!({
            "results": names.iter().map(|n| json!({ "full_name": n })).collect::<Vec<_>>()
        })
    }

    /// Serves a fixed queue of pages, then empty pages. Notifies on every
    /// fetch so tests can synchronize with page boundaries.
    struct ScriptedFetcher {
        pages: Mutex<VecDeque<Result<Value, AppError>>>,
        fetched: mpsc::UnboundedSender<u32>,
        count: std::sync::atomic::AtomicU32,
    }

    impl ScriptedFetcher {
        fn new(pages: Vec<Result<Value, AppError>>) -> (Arc<Self>, mpsc::UnboundedReceiver<u32>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    pages: Mutex::new(pages.into()),
                    fetched: tx,
                    count: std::sync::atomic::AtomicU32::new(0),
                }),
                rx,
            )
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            _request: &PageRequest,
            _proxy: Option<&ProxyEndpoint>,
        ) -> Result<Value, AppError> {
            let n = self
                .count
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                + 1;
            let _ = self.fetched.send(n);
            self.pages
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(json!({ "results": [] })))
        }
    }

    /// Never resolves; used to hold a run open.
    struct PendingFetcher;

    #[async_trait]
    impl PageFetcher for PendingFetcher {
        async fn fetch(
            &self,
            _request: &PageRequest,
            _proxy: Option<&ProxyEndpoint>,
        ) -> Result<Value, AppError> {
            std::future::pending().await
        }
    }

    async fn setup(
        fetcher: Arc<dyn PageFetcher>,
    ) -> (Arc<ScrapeOrchestrator>, Storage, CandidateSource) {
        let storage = Storage::memory();
        let source = quick_source();
        storage.sources.insert(&source).await.unwrap();
        let orchestrator = ScrapeOrchestrator::new(storage.clone(), fetcher, test_config());
        (orchestrator, storage, source)
    }

    async fn await_completion(orchestrator: &Arc<ScrapeOrchestrator>, source_id: Uuid) {
        for _ in 0..1000 {
            if !orchestrator.status(source_id).await.unwrap().is_running {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("run did not finish");
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_and_leaves_no_run_entry() {
        let (orchestrator, storage, source) = setup(Arc::new(PendingFetcher)).await;

        orchestrator
            .start(source.id, RunTrigger::Manual, "op")
            .await
            .unwrap();
        let second = orchestrator.start(source.id, RunTrigger::Api, "op").await;
        assert!(matches!(second, Err(AppError::AlreadyRunning(_))));

        orchestrator.stop(source.id).await.unwrap();
        await_completion(&orchestrator, source.id).await;

        // Exactly one ledger entry: the rejected start created nothing.
        let stored = storage.sources.get(source.id).await.unwrap();
        assert_eq!(stored.run_history.len(), 1);
        assert_eq!(stored.run_history[0].status, RunStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_after_page_three_finalizes_as_stopped() {
        let pages: Vec<Result<Value, AppError>> = (0..10)
            .map(|p| {
                Ok(page_with_rows(&[
                    &format!("page{p} row0"),
                    &format!("page{p} row1"),
                ]))
            })
            .collect();
        let (fetcher, mut fetched) = ScriptedFetcher::new(pages);
        let (orchestrator, storage, source) = setup(fetcher).await;

        orchestrator
            .start(source.id, RunTrigger::Manual, "op")
            .await
            .unwrap();

        // Wait for the third page fetch, then request a stop while the
        // loop is in the rate wait ahead of page four.
        while fetched.recv().await != Some(3) {}
        orchestrator.stop(source.id).await.unwrap();
        await_completion(&orchestrator, source.id).await;

        let stored = storage.sources.get(source.id).await.unwrap();
        let run = &stored.run_history[0];
        assert_eq!(run.status, RunStatus::Stopped);
        assert_eq!(run.pages_scraped, 3);
        assert_eq!(run.candidates_found, 6);

        // The source is immediately eligible for a new start.
        orchestrator
            .start(source.id, RunTrigger::Manual, "op")
            .await
            .unwrap();
        orchestrator.stop(source.id).await.unwrap();
        await_completion(&orchestrator, source.id).await;
    }

    #[tokio::test(start_paused = true)]
    async fn auth_challenge_on_first_page_fails_with_one_error() {
        let (fetcher, _fetched) =
            ScriptedFetcher::new(vec![Ok(json!({ "login_required": true }))]);
        let (orchestrator, storage, source) = setup(fetcher).await;

        orchestrator
            .start(source.id, RunTrigger::Scheduled, "scheduler")
            .await
            .unwrap();
        await_completion(&orchestrator, source.id).await;

        let stored = storage.sources.get(source.id).await.unwrap();
        let run = &stored.run_history[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.pages_scraped, 0);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].message, AUTH_REQUIRED);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_auth_challenges_park_the_source() {
        let (fetcher, _fetched) = ScriptedFetcher::new(vec![
            Ok(json!({ "login_required": true })),
            Ok(json!({ "login_required": true })),
        ]);
        let (orchestrator, storage, source) = setup(fetcher).await;

        for _ in 0..2 {
            orchestrator
                .start(source.id, RunTrigger::Scheduled, "scheduler")
                .await
                .unwrap();
            await_completion(&orchestrator, source.id).await;
        }

        let stored = storage.sources.get(source.id).await.unwrap();
        assert_eq!(stored.status, SourceStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn page_errors_escalate_after_consecutive_failures() {
        let pages: Vec<Result<Value, AppError>> = (0..5)
            .map(|_| Err(AppError::Fetch("connection reset".into())))
            .collect();
        let (fetcher, _fetched) = ScriptedFetcher::new(pages);
        let (orchestrator, storage, source) = setup(fetcher).await;

        orchestrator
            .start(source.id, RunTrigger::Manual, "op")
            .await
            .unwrap();
        await_completion(&orchestrator, source.id).await;

        let stored = storage.sources.get(source.id).await.unwrap();
        let run = &stored.run_history[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.pages_scraped, 0);
        // Three page errors plus the escalation entry.
        assert_eq!(run.errors.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn single_page_error_is_recoverable() {
        let (fetcher, _fetched) = ScriptedFetcher::new(vec![
            Ok(page_with_rows(&["one"])),
            Err(AppError::Fetch("connection reset".into())),
            Ok(page_with_rows(&["two"])),
            Ok(json!({ "results": [] })),
        ]);
        let (orchestrator, storage, source) = setup(fetcher).await;

        orchestrator
            .start(source.id, RunTrigger::Manual, "op")
            .await
            .unwrap();
        await_completion(&orchestrator, source.id).await;

        let stored = storage.sources.get(source.id).await.unwrap();
        let run = &stored.run_history[0];
        assert_eq!(run.status, RunStatus::Completed);
        // Pages one, three, and the empty exhaustion page all count; the
        // failed page contributed an error entry instead.
        assert_eq!(run.pages_scraped, 3);
        assert_eq!(run.candidates_found, 2);
        assert_eq!(run.candidates_added, 2);
        assert_eq!(run.errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_budget_interrupts_long_rate_waits() {
        let (fetcher, _fetched) = ScriptedFetcher::new(vec![
            Ok(page_with_rows(&["one"])),
            Ok(page_with_rows(&["two"])),
        ]);
        let storage = Storage::memory();
        let mut source = quick_source();
        // One request per day forces a rate floor far beyond the run
        // budget; the second page's wait must be cut off at the deadline.
        source.rate_limit.max_requests_per_day = Some(1);
        storage.sources.insert(&source).await.unwrap();
        let orchestrator = ScrapeOrchestrator::new(storage.clone(), fetcher, test_config());

        orchestrator
            .start(source.id, RunTrigger::Manual, "op")
            .await
            .unwrap();
        await_completion(&orchestrator, source.id).await;

        let stored = storage.sources.get(source.id).await.unwrap();
        let run = &stored.run_history[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.pages_scraped, 1);
        assert!(run.errors[0].message.contains("run timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn required_proxy_with_empty_pool_fails_the_run() {
        let (fetcher, _fetched) = ScriptedFetcher::new(vec![Ok(page_with_rows(&["x"]))]);
        let storage = Storage::memory();
        let mut source = quick_source();
        source.proxies.require_proxy = true;
        storage.sources.insert(&source).await.unwrap();
        let orchestrator = ScrapeOrchestrator::new(storage.clone(), fetcher, test_config());

        orchestrator
            .start(source.id, RunTrigger::Manual, "op")
            .await
            .unwrap();
        await_completion(&orchestrator, source.id).await;

        let stored = storage.sources.get(source.id).await.unwrap();
        let run = &stored.run_history[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.pages_scraped, 0);
        assert!(run.errors[0].message.contains("requires proxy"));
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_platform_fails_fast() {
        let (fetcher, _fetched) = ScriptedFetcher::new(vec![]);
        let storage = Storage::memory();
        let source = CandidateSource::new("fb", Platform::Facebook);
        storage.sources.insert(&source).await.unwrap();
        let orchestrator = ScrapeOrchestrator::new(storage.clone(), fetcher, test_config());

        let result = orchestrator.start(source.id, RunTrigger::Manual, "op").await;
        assert!(matches!(result, Err(AppError::UnsupportedPlatform(_))));
        let stored = storage.sources.get(source.id).await.unwrap();
        assert!(stored.run_history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_active_run_is_an_error() {
        let (fetcher, _fetched) = ScriptedFetcher::new(vec![]);
        let (orchestrator, _storage, source) = setup(fetcher).await;
        let result = orchestrator.stop(source.id).await;
        assert!(matches!(result, Err(AppError::NoActiveScrape(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_within_a_run_are_counted() {
        let (fetcher, _fetched) = ScriptedFetcher::new(vec![
            Ok(json!({ "results": [
                { "full_name": "Ada", "profile_url": "https://b.example/ada" },
                { "full_name": "Ada", "profile_url": "https://b.example/ada" },
            ]})),
            Ok(json!({ "results": [] })),
        ]);
        let (orchestrator, storage, source) = setup(fetcher).await;

        orchestrator
            .start(source.id, RunTrigger::Manual, "op")
            .await
            .unwrap();
        await_completion(&orchestrator, source.id).await;

        let stored = storage.sources.get(source.id).await.unwrap();
        let run = &stored.run_history[0];
        assert_eq!(run.candidates_found, 2);
        assert_eq!(run.candidates_added, 1);
        assert_eq!(run.duplicates_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_run_emits_an_audit_event() {
        let (fetcher, _fetched) = ScriptedFetcher::new(vec![Ok(json!({ "results": [] }))]);
        let memory = Arc::new(crate::store::memory::MemoryStore::default());
        let storage = Storage {
            sources: memory.clone(),
            candidates: memory.clone(),
            audit: memory.clone(),
        };
        let source = quick_source();
        storage.sources.insert(&source).await.unwrap();
        let orchestrator = ScrapeOrchestrator::new(storage.clone(), fetcher, test_config());

        orchestrator
            .start(source.id, RunTrigger::Api, "alex")
            .await
            .unwrap();
        await_completion(&orchestrator, source.id).await;
        // Audit emission is spawned; let it land.
        tokio::task::yield_now().await;

        let events = memory.audit_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "scrape.completed");
        assert_eq!(events[0].actor, "alex");
    }

    #[tokio::test]
    async fn recover_stale_finalizes_a_failed_entry() {
        let (fetcher, _fetched) = ScriptedFetcher::new(vec![]);
        let (orchestrator, storage, source) = setup(fetcher).await;

        // A crashed worker left an expired lease behind.
        let expired = Utc::now() - ChronoDuration::minutes(1);
        assert!(
            storage
                .sources
                .acquire_lease(source.id, Uuid::new_v4(), expired)
                .await
                .unwrap()
        );

        let recovered = orchestrator.recover_stale().await.unwrap();
        assert_eq!(recovered, 1);

        let stored = storage.sources.get(source.id).await.unwrap();
        assert_eq!(stored.run_history.len(), 1);
        assert_eq!(stored.run_history[0].status, RunStatus::Failed);

        // The lease is gone: a fresh start succeeds.
        orchestrator
            .start(source.id, RunTrigger::Manual, "op")
            .await
            .unwrap();
    }
}
