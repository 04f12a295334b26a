use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::source::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    New,
    Contacted,
    Responded,
    Archived,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::New => "new",
            CandidateStatus::Contacted => "contacted",
            CandidateStatus::Responded => "responded",
            CandidateStatus::Archived => "archived",
        }
    }
}

impl FromStr for CandidateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(CandidateStatus::New),
            "contacted" => Ok(CandidateStatus::Contacted),
            "responded" => Ok(CandidateStatus::Responded),
            "archived" => Ok(CandidateStatus::Archived),
            _ => Err(format!("unknown candidate status '{s}'")),
        }
    }
}

/// A raw candidate row as extracted from one results page, before
/// deduplication. Platform-specific fields map onto this common shape;
/// anything that does not fit is dropped by the adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateRow {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub experience_years: Option<i32>,
    #[serde(default)]
    pub skills: Vec<String>,
    /// Opaque platform-side identifier for the row, kept for provenance.
    #[serde(default)]
    pub source_reference: Option<String>,
}

/// Durable talent-pool entry. Owned by the talent pool; the sourcing
/// engine only holds the `source_id` back-reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub profile_url: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub experience_years: Option<i32>,
    pub skills: Vec<String>,
    pub location: Option<String>,
    pub platform: Platform,
    pub source_id: Option<Uuid>,
    pub source_reference: Option<String>,
    pub status: CandidateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CandidateRecord {
    pub fn from_row(row: CandidateRow, platform: Platform, source_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: row.name,
            email: row.email,
            phone: row.phone,
            profile_url: row.profile_url,
            title: row.title,
            company: row.company,
            experience_years: row.experience_years,
            skills: row.skills,
            location: row.location,
            platform,
            source_id: Some(source_id),
            source_reference: row.source_reference,
            status: CandidateStatus::New,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CandidateFilters {
    pub source_id: Option<Uuid>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}
