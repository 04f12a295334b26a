use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::proxy::ProxyPoolState;
use crate::models::run::ScrapeRun;

/// Run-history entries retained per source. Older entries are dropped,
/// not archived; rollup stats are recomputed from this window.
pub const RUN_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linkedin,
    Facebook,
    Jobboard,
    Other,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linkedin => "linkedin",
            Platform::Facebook => "facebook",
            Platform::Jobboard => "jobboard",
            Platform::Other => "other",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linkedin" => Ok(Platform::Linkedin),
            "facebook" => Ok(Platform::Facebook),
            "jobboard" => Ok(Platform::Jobboard),
            "other" => Ok(Platform::Other),
            _ => Err(format!("unknown platform '{s}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Paused,
    Error,
    Maintenance,
    Deprecated,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Paused => "paused",
            SourceStatus::Error => "error",
            SourceStatus::Maintenance => "maintenance",
            SourceStatus::Deprecated => "deprecated",
        }
    }
}

impl FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SourceStatus::Active),
            "paused" => Ok(SourceStatus::Paused),
            "error" => Ok(SourceStatus::Error),
            "maintenance" => Ok(SourceStatus::Maintenance),
            "deprecated" => Ok(SourceStatus::Deprecated),
            _ => Err(format!("unknown source status '{s}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    pub max_pages: u32,
    pub results_per_page: u32,
    /// Platform-specific search filters, passed through to the adapter.
    pub filters: serde_json::Value,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            locations: Vec::new(),
            max_pages: 10,
            results_per_page: 25,
            filters: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    pub max_requests_per_minute: Option<u32>,
    pub max_requests_per_hour: Option<u32>,
    pub max_requests_per_day: Option<u32>,
    /// Minimum delay between consecutive requests.
    pub base_delay_ms: u64,
    /// Uniform jitter applied on top of the base delay when randomize is set.
    pub jitter_ms: u64,
    pub randomize: bool,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests_per_minute: None,
            max_requests_per_hour: None,
            max_requests_per_day: None,
            base_delay_ms: 5000,
            jitter_ms: 1000,
            randomize: true,
        }
    }
}

impl RateLimitPolicy {
    /// Effective minimum spacing between requests. The per-minute/hour/day
    /// caps are folded into the floor: a cap of N per period means at least
    /// period/N between requests.
    pub fn floor_delay(&self) -> Duration {
        let mut floor = self.base_delay_ms;
        for (cap, period_ms) in [
            (self.max_requests_per_minute, 60_000u64),
            (self.max_requests_per_hour, 3_600_000),
            (self.max_requests_per_day, 86_400_000),
        ] {
            if let Some(cap) = cap
                && cap > 0
            {
                floor = floor.max(period_ms / u64::from(cap));
            }
        }
        Duration::from_millis(floor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub is_enabled: bool,
    pub frequency: Frequency,
    /// Minute of the hour (all frequencies).
    pub minute: u32,
    /// Hour of the day (daily/weekly/monthly).
    pub hour: u32,
    /// Day of the week, 0 = Monday .. 6 = Sunday (weekly).
    pub weekday: Option<u32>,
    /// Day of the month, 1..=31, clamped to the month length (monthly).
    pub day_of_month: Option<u32>,
    /// IANA timezone name; falls back to UTC when unparseable.
    pub timezone: String,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            is_enabled: false,
            frequency: Frequency::Daily,
            minute: 0,
            hour: 9,
            weekday: None,
            day_of_month: None,
            timezone: "UTC".to_string(),
            next_run_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceStats {
    /// All-time run counter (not windowed).
    pub total_runs: u64,
    pub total_candidates_found: u64,
    pub total_candidates_added: u64,
    /// Percentage of completed runs over the retained history window,
    /// rounded to the nearest integer. Old runs age out of this rate.
    pub success_rate: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
}

/// A configured sourcing channel, with all operational state embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSource {
    pub id: Uuid,
    pub name: String,
    pub platform: Platform,
    pub status: SourceStatus,
    pub config: ScrapingConfig,
    pub rate_limit: RateLimitPolicy,
    pub proxies: ProxyPoolState,
    pub schedule: ScheduleConfig,
    /// Newest first, capped at RUN_HISTORY_LIMIT.
    pub run_history: Vec<ScrapeRun>,
    pub stats: SourceStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CandidateSource {
    pub fn new(name: impl Into<String>, platform: Platform) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            platform,
            status: SourceStatus::Active,
            config: ScrapingConfig::default(),
            rate_limit: RateLimitPolicy::default(),
            proxies: ProxyPoolState::default(),
            schedule: ScheduleConfig::default(),
            run_history: Vec::new(),
            stats: SourceStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn last_run(&self) -> Option<&ScrapeRun> {
        self.run_history.first()
    }

    /// A source is considered by the scheduler only when active, schedule
    /// enabled, and its next-due instant has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == SourceStatus::Active
            && self.schedule.is_enabled
            && self
                .schedule
                .next_run_at
                .is_some_and(|due| due <= now)
    }
}
