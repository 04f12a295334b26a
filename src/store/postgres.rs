use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::audit::AuditEvent;
use crate::models::candidate::{CandidateFilters, CandidateRecord, CandidateStatus};
use crate::models::proxy::ProxyPoolState;
use crate::models::run::ScrapeRun;
use crate::models::source::{
    CandidateSource, Platform, RateLimitPolicy, ScheduleConfig, ScrapingConfig, SourceStats,
    SourceStatus,
};
use crate::store::{AuditStore, CandidateStore, InsertOutcome, SourceStore};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    name: String,
    platform: String,
    status: String,
    config: Json<ScrapingConfig>,
    rate_limit: Json<RateLimitPolicy>,
    proxies: Json<ProxyPoolState>,
    schedule: Json<ScheduleConfig>,
    run_history: Json<Vec<ScrapeRun>>,
    stats: Json<SourceStats>,
    next_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SourceRow> for CandidateSource {
    type Error = AppError;

    fn try_from(row: SourceRow) -> Result<Self, AppError> {
        let mut schedule = row.schedule.0;
        // The column is authoritative; the jsonb copy exists for reads of
        // the raw document.
        schedule.next_run_at = row.next_run_at;
        Ok(CandidateSource {
            id: row.id,
            name: row.name,
            platform: Platform::from_str(&row.platform).map_err(AppError::Internal)?,
            status: SourceStatus::from_str(&row.status).map_err(AppError::Internal)?,
            config: row.config.0,
            rate_limit: row.rate_limit.0,
            proxies: row.proxies.0,
            schedule,
            run_history: row.run_history.0,
            stats: row.stats.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SOURCE_COLUMNS: &str = "id, name, platform, status, config, rate_limit, proxies, schedule, run_history, stats, next_run_at, created_at, updated_at";

#[async_trait]
impl SourceStore for PgStore {
    async fn insert(&self, source: &CandidateSource) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO sources (id, name, platform, status, config, rate_limit, proxies, schedule, run_history, stats, next_run_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(source.id)
        .bind(&source.name)
        .bind(source.platform.as_str())
        .bind(source.status.as_str())
        .bind(Json(&source.config))
        .bind(Json(&source.rate_limit))
        .bind(Json(&source.proxies))
        .bind(Json(&source.schedule))
        .bind(Json(&source.run_history))
        .bind(Json(&source.stats))
        .bind(source.schedule.next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<CandidateSource, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Source {id} not found")))?;
        row.try_into()
    }

    async fn list(&self) -> Result<Vec<CandidateSource>, AppError> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update(&self, source: &CandidateSource) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE sources SET name = $2, platform = $3, status = $4, config = $5, rate_limit = $6, \
             proxies = $7, schedule = $8, next_run_at = $9, updated_at = NOW() WHERE id = $1",
        )
        .bind(source.id)
        .bind(&source.name)
        .bind(source.platform.as_str())
        .bind(source.status.as_str())
        .bind(Json(&source.config))
        .bind(Json(&source.rate_limit))
        .bind(Json(&source.proxies))
        .bind(Json(&source.schedule))
        .bind(source.schedule.next_run_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Source {} not found", source.id)));
        }
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<CandidateSource>, AppError> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources \
             WHERE status = 'active' AND (schedule->>'is_enabled')::boolean \
             AND next_run_at IS NOT NULL AND next_run_at <= $1"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_next_run(&self, id: Uuid, when: Option<DateTime<Utc>>) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE sources SET next_run_at = $2, \
             schedule = jsonb_set(schedule, '{next_run_at}', COALESCE(to_jsonb($2::timestamptz), 'null'::jsonb)), \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(when)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: SourceStatus) -> Result<(), AppError> {
        sqlx::query("UPDATE sources SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_proxy_state(&self, id: Uuid, state: &ProxyPoolState) -> Result<(), AppError> {
        sqlx::query("UPDATE sources SET proxies = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(Json(state))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_run_history(
        &self,
        id: Uuid,
        history: &[ScrapeRun],
        stats: &SourceStats,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE sources SET run_history = $2, stats = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(Json(history))
        .bind(Json(stats))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn acquire_lease(
        &self,
        id: Uuid,
        owner: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE sources SET lock_owner = $2, lock_expires_at = $3 \
             WHERE id = $1 AND (lock_owner IS NULL OR lock_expires_at <= NOW())",
        )
        .bind(id)
        .bind(owner)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, id: Uuid, owner: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE sources SET lock_owner = NULL, lock_expires_at = NULL \
             WHERE id = $1 AND lock_owner = $2",
        )
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE sources SET lock_owner = NULL, lock_expires_at = NULL \
             WHERE lock_owner IS NOT NULL AND lock_expires_at <= $1 RETURNING id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CandidateDbRow {
    id: Uuid,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    profile_url: Option<String>,
    title: Option<String>,
    company: Option<String>,
    experience_years: Option<i32>,
    skills: Vec<String>,
    location: Option<String>,
    platform: String,
    source_id: Option<Uuid>,
    source_reference: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CandidateDbRow> for CandidateRecord {
    type Error = AppError;

    fn try_from(row: CandidateDbRow) -> Result<Self, AppError> {
        Ok(CandidateRecord {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            profile_url: row.profile_url,
            title: row.title,
            company: row.company,
            experience_years: row.experience_years,
            skills: row.skills,
            location: row.location,
            platform: Platform::from_str(&row.platform).map_err(AppError::Internal)?,
            source_id: row.source_id,
            source_reference: row.source_reference,
            status: CandidateStatus::from_str(&row.status).map_err(AppError::Internal)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn first_record(row: Option<CandidateDbRow>) -> Result<Option<CandidateRecord>, AppError> {
    row.map(TryInto::try_into).transpose()
}

#[async_trait]
impl CandidateStore for PgStore {
    async fn insert_if_absent(&self, record: &CandidateRecord) -> Result<InsertOutcome, AppError> {
        // The unique partial indexes on profile_url/email/phone arbitrate;
        // a concurrent insert for the same key affects zero rows here.
        let result = sqlx::query(
            "INSERT INTO candidates (id, name, email, phone, profile_url, title, company, experience_years, skills, location, platform, source_id, source_reference, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT DO NOTHING",
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(&record.profile_url)
        .bind(&record.title)
        .bind(&record.company)
        .bind(record.experience_years)
        .bind(&record.skills)
        .bind(&record.location)
        .bind(record.platform.as_str())
        .bind(record.source_id)
        .bind(&record.source_reference)
        .bind(record.status.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            Ok(InsertOutcome::Created)
        } else {
            Ok(InsertOutcome::Duplicate)
        }
    }

    async fn find_by_profile_url(&self, url: &str) -> Result<Option<CandidateRecord>, AppError> {
        let row = sqlx::query_as::<_, CandidateDbRow>(
            "SELECT * FROM candidates WHERE lower(profile_url) = lower($1) LIMIT 1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        first_record(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<CandidateRecord>, AppError> {
        let row = sqlx::query_as::<_, CandidateDbRow>(
            "SELECT * FROM candidates WHERE lower(email) = lower($1) LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        first_record(row)
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<CandidateRecord>, AppError> {
        let row = sqlx::query_as::<_, CandidateDbRow>(
            "SELECT * FROM candidates WHERE phone = $1 LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        first_record(row)
    }

    async fn find_by_name_company(
        &self,
        name: &str,
        company: &str,
    ) -> Result<Option<CandidateRecord>, AppError> {
        let row = sqlx::query_as::<_, CandidateDbRow>(
            "SELECT * FROM candidates WHERE lower(name) = lower($1) AND lower(company) = lower($2) LIMIT 1",
        )
        .bind(name)
        .bind(company)
        .fetch_optional(&self.pool)
        .await?;
        first_record(row)
    }

    async fn list(&self, filters: &CandidateFilters) -> Result<Vec<CandidateRecord>, AppError> {
        let per_page = filters.per_page.unwrap_or(50).min(100);
        let offset = (filters.page.unwrap_or(1) - 1).max(0) * per_page;
        let rows = sqlx::query_as::<_, CandidateDbRow>(
            "SELECT * FROM candidates \
             WHERE ($1::uuid IS NULL OR source_id = $1) \
             AND ($2::text IS NULL OR name ILIKE '%' || $2 || '%' OR title ILIKE '%' || $2 || '%') \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4",
        )
        .bind(filters.source_id)
        .bind(&filters.search)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn record(&self, event: &AuditEvent) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO audit_events (id, action, entity, entity_id, actor, details, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.id)
        .bind(&event.action)
        .bind(&event.entity)
        .bind(&event.entity_id)
        .bind(&event.actor)
        .bind(&event.details)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
