use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Manual,
    Scheduled,
    Api,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Manual => "manual",
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Api => "api",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub url: Option<String>,
}

/// One execution attempt against a source. Mutated throughout the run,
/// frozen when appended to the source's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub id: Uuid,
    pub status: RunStatus,
    pub trigger: RunTrigger,
    pub actor: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_scraped: u32,
    pub candidates_found: u32,
    pub candidates_added: u32,
    pub duplicates_skipped: u32,
    pub errors: Vec<RunError>,
    pub proxy_used: Option<String>,
}

impl ScrapeRun {
    pub fn begin(trigger: RunTrigger, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: RunStatus::Running,
            trigger,
            actor: actor.into(),
            started_at: Utc::now(),
            finished_at: None,
            pages_scraped: 0,
            candidates_found: 0,
            candidates_added: 0,
            duplicates_skipped: 0,
            errors: Vec::new(),
            proxy_used: None,
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>, url: Option<String>) {
        self.errors.push(RunError {
            message: message.into(),
            timestamp: Utc::now(),
            url,
        });
    }

    pub fn first_error(&self) -> Option<&RunError> {
        self.errors.first()
    }
}
