use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::engine::orchestrator::ScrapeOrchestrator;
use crate::error::AppError;
use crate::models::run::RunTrigger;
use crate::models::source::{Frequency, ScheduleConfig};
use crate::store::Storage;

/// Periodically scans for due sources and enqueues orchestrator runs.
pub struct SourceScheduler {
    storage: Storage,
    orchestrator: Arc<ScrapeOrchestrator>,
    interval: Duration,
}

impl SourceScheduler {
    pub fn new(storage: Storage, orchestrator: Arc<ScrapeOrchestrator>, interval: Duration) -> Self {
        Self {
            storage,
            orchestrator,
            interval,
        }
    }

    /// Tick loop. Exits gracefully on SIGINT.
    pub async fn run(self) {
        tracing::info!(
            "Scheduler started, scanning every {}s",
            self.interval.as_secs()
        );
        loop {
            tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received, scheduler exiting");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        tracing::error!("Scheduler tick failed: {e}");
                    }
                }
            }
        }
    }

    /// One scan over due sources. Sources already running are skipped
    /// silently; other start failures are logged and skipped.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<u32, AppError> {
        let due = self.storage.sources.due(now).await?;
        let mut started = 0;
        for source in due {
            match self
                .orchestrator
                .start(source.id, RunTrigger::Scheduled, "scheduler")
                .await
            {
                Ok(run_id) => {
                    tracing::info!(source_id = %source.id, run_id = %run_id, "Scheduled scrape started");
                    started += 1;
                }
                Err(AppError::AlreadyRunning(_)) => {
                    tracing::debug!(source_id = %source.id, "Skipping source, scrape in progress");
                }
                Err(e) => {
                    tracing::warn!(source_id = %source.id, "Failed to start scheduled scrape: {e}");
                }
            }
        }
        Ok(started)
    }
}

/// Next due instant strictly after `now`, honoring the schedule's fields
/// in its configured timezone. Disabled schedules yield None.
pub fn next_run_after(schedule: &ScheduleConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !schedule.is_enabled {
        return None;
    }
    let tz: Tz = schedule.timezone.parse().unwrap_or(chrono_tz::UTC);
    let local = now.with_timezone(&tz).naive_local();
    let minute = schedule.minute.min(59);
    let hour = schedule.hour.min(23);

    let candidate = match schedule.frequency {
        Frequency::Hourly => {
            let mut c = local
                .date()
                .and_hms_opt(local.hour(), minute, 0)?;
            if c <= local {
                c += ChronoDuration::hours(1);
            }
            c
        }
        Frequency::Daily => {
            let mut c = local.date().and_hms_opt(hour, minute, 0)?;
            if c <= local {
                c += ChronoDuration::days(1);
            }
            c
        }
        Frequency::Weekly => {
            // weekday: 0 = Monday .. 6 = Sunday
            let target = schedule.weekday.unwrap_or(0).min(6);
            let current = local.weekday().num_days_from_monday();
            let ahead = (i64::from(target) - i64::from(current)).rem_euclid(7);
            let mut c = (local.date() + ChronoDuration::days(ahead)).and_hms_opt(hour, minute, 0)?;
            if c <= local {
                c += ChronoDuration::days(7);
            }
            c
        }
        Frequency::Monthly => {
            let day = schedule.day_of_month.unwrap_or(1).clamp(1, 31);
            let this_month = clamped_date(local.year(), local.month(), day)?
                .and_hms_opt(hour, minute, 0)?;
            if this_month > local {
                this_month
            } else {
                let (year, month) = if local.month() == 12 {
                    (local.year() + 1, 1)
                } else {
                    (local.year(), local.month() + 1)
                };
                clamped_date(year, month, day)?.and_hms_opt(hour, minute, 0)?
            }
        }
    };

    resolve_local(candidate, tz).map(|dt| dt.with_timezone(&Utc))
}

/// Day-of-month clamped to the month's length (31st in February becomes
/// the 28th/29th) rather than rolling over or erroring.
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let last = days_in_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, day.min(last))
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((next - first).num_days() as u32)
}

/// Resolve a naive local time in `tz`. DST ambiguity takes the earlier
/// instant; a nonexistent time (spring-forward gap) shifts an hour later.
fn resolve_local(naive: chrono::NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    use chrono::offset::LocalResult;
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earlier, _) => Some(earlier),
        LocalResult::None => tz
            .from_local_datetime(&(naive + ChronoDuration::hours(1)))
            .earliest(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(frequency: Frequency) -> ScheduleConfig {
        ScheduleConfig {
            is_enabled: true,
            frequency,
            minute: 0,
            hour: 9,
            weekday: None,
            day_of_month: None,
            timezone: "UTC".to_string(),
            next_run_at: None,
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn disabled_schedule_has_no_next_run() {
        let mut s = schedule(Frequency::Daily);
        s.is_enabled = false;
        assert_eq!(next_run_after(&s, Utc::now()), None);
    }

    #[test]
    fn daily_after_todays_slot_lands_tomorrow() {
        let s = schedule(Frequency::Daily);
        // Run finished at 10:30, past today's 09:00.
        let next = next_run_after(&s, utc(2026, 8, 24, 10, 30)).unwrap();
        assert_eq!(next, utc(2026, 8, 25, 9, 0));
    }

    #[test]
    fn daily_honors_the_configured_timezone() {
        let mut s = schedule(Frequency::Daily);
        s.timezone = "America/New_York".to_string();
        // 14:30 UTC on Aug 24 is 10:30 in New York (UTC-4), past 09:00
        // local, so the next slot is Aug 25 09:00 local = 13:00 UTC.
        let next = next_run_after(&s, utc(2026, 8, 24, 14, 30)).unwrap();
        assert_eq!(next, utc(2026, 8, 25, 13, 0));
    }

    #[test]
    fn hourly_targets_the_next_minute_mark() {
        let mut s = schedule(Frequency::Hourly);
        s.minute = 15;
        assert_eq!(
            next_run_after(&s, utc(2026, 8, 24, 10, 10)).unwrap(),
            utc(2026, 8, 24, 10, 15)
        );
        assert_eq!(
            next_run_after(&s, utc(2026, 8, 24, 10, 20)).unwrap(),
            utc(2026, 8, 24, 11, 15)
        );
    }

    #[test]
    fn weekly_wraps_to_the_configured_weekday() {
        let mut s = schedule(Frequency::Weekly);
        s.weekday = Some(0); // Monday
        // Aug 24 2026 is a Monday; at 10:00 the 09:00 slot has passed.
        let next = next_run_after(&s, utc(2026, 8, 24, 10, 0)).unwrap();
        assert_eq!(next, utc(2026, 8, 31, 9, 0));

        // On Saturday the slot is two days ahead.
        let next = next_run_after(&s, utc(2026, 8, 22, 10, 0)).unwrap();
        assert_eq!(next, utc(2026, 8, 24, 9, 0));
    }

    #[test]
    fn monthly_clamps_nonexistent_days() {
        let mut s = schedule(Frequency::Monthly);
        s.day_of_month = Some(31);
        // February 2026 has 28 days.
        let next = next_run_after(&s, utc(2026, 2, 10, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 2, 28, 9, 0));

        // Past February's clamped slot: March has a real 31st.
        let next = next_run_after(&s, utc(2026, 2, 28, 10, 0)).unwrap();
        assert_eq!(next, utc(2026, 3, 31, 9, 0));
    }

    #[test]
    fn dst_transitions_resolve_deterministically() {
        let mut s = schedule(Frequency::Daily);
        s.timezone = "America/New_York".to_string();

        // Fall back, Nov 1 2026: 01:30 local happens twice; the earlier
        // instant (EDT, UTC-4) wins.
        s.hour = 1;
        s.minute = 30;
        let next = next_run_after(&s, utc(2026, 11, 1, 4, 0)).unwrap();
        assert_eq!(next, utc(2026, 11, 1, 5, 30));

        // Spring forward, Mar 8 2026: 02:30 local does not exist; the
        // slot shifts an hour later (03:30 EDT = 07:30 UTC).
        s.hour = 2;
        let next = next_run_after(&s, utc(2026, 3, 8, 5, 0)).unwrap();
        assert_eq!(next, utc(2026, 3, 8, 7, 30));
    }

    #[test]
    fn unparseable_timezone_falls_back_to_utc() {
        let mut s = schedule(Frequency::Daily);
        s.timezone = "Not/AZone".to_string();
        let next = next_run_after(&s, utc(2026, 8, 24, 8, 0)).unwrap();
        assert_eq!(next, utc(2026, 8, 24, 9, 0));
    }

    mod ticking {
        use super::*;
        use crate::engine::EngineConfig;
        use crate::engine::orchestrator::ScrapeOrchestrator;
        use crate::error::AppError;
        use crate::fetch::{PageFetcher, PageRequest};
        use crate::models::proxy::ProxyEndpoint;
        use crate::models::source::{CandidateSource, Platform};
        use crate::store::Storage;

        /// Never resolves, so started runs stay visibly in flight.
        struct StallFetcher;

        #[async_trait::async_trait]
        impl PageFetcher for StallFetcher {
            async fn fetch(
                &self,
                _request: &PageRequest,
                _proxy: Option<&ProxyEndpoint>,
            ) -> Result<serde_json::Value, AppError> {
                std::future::pending().await
            }
        }

        #[tokio::test(start_paused = true)]
        async fn due_sources_start_once_and_running_ones_are_skipped() {
            let storage = Storage::memory();
            let mut due = CandidateSource::new("due", Platform::Jobboard);
            due.schedule.is_enabled = true;
            due.schedule.next_run_at = Some(Utc::now() - ChronoDuration::minutes(1));
            storage.sources.insert(&due).await.unwrap();

            let mut idle = CandidateSource::new("idle", Platform::Jobboard);
            idle.schedule.is_enabled = true;
            idle.schedule.next_run_at = Some(Utc::now() + ChronoDuration::hours(1));
            storage.sources.insert(&idle).await.unwrap();

            let orchestrator = ScrapeOrchestrator::new(
                storage.clone(),
                Arc::new(StallFetcher),
                EngineConfig::default(),
            );
            let scheduler = SourceScheduler::new(
                storage.clone(),
                orchestrator.clone(),
                Duration::from_secs(60),
            );

            assert_eq!(scheduler.tick(Utc::now()).await.unwrap(), 1);
            // The run is still in flight, so a second pass starts nothing.
            assert_eq!(scheduler.tick(Utc::now()).await.unwrap(), 0);
            assert!(orchestrator.status(due.id).await.unwrap().is_running);
            assert!(!orchestrator.status(idle.id).await.unwrap().is_running);

            orchestrator.stop(due.id).await.unwrap();
        }
    }
}
