use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::candidate::{CandidateRecord, CandidateRow};
use crate::models::source::Platform;
use crate::store::{CandidateStore, InsertOutcome, with_retry};

/// Upper bound on one import batch, to bound memory and transaction size.
pub const MAX_IMPORT_BATCH: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(Uuid),
    Duplicate(Uuid),
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub added: u32,
    pub duplicates: u32,
    pub errors: Vec<ImportError>,
}

#[derive(Debug, Serialize)]
pub struct ImportError {
    pub row: usize,
    pub message: String,
}

/// Decides whether a freshly extracted candidate already exists. Match
/// priority: profile URL, then email, then phone, then (name, company).
/// URL is the strongest identity signal for scraped profiles; the
/// name+company fallback deliberately accepts missed duplicates over
/// merging two distinct people.
#[derive(Clone)]
pub struct Deduplicator {
    candidates: Arc<dyn CandidateStore>,
}

impl Deduplicator {
    pub fn new(candidates: Arc<dyn CandidateStore>) -> Self {
        Self { candidates }
    }

    pub async fn upsert(
        &self,
        row: CandidateRow,
        platform: Platform,
        source_id: Uuid,
    ) -> Result<UpsertOutcome, AppError> {
        if let Some(existing) = self.find_match(&row).await? {
            return Ok(UpsertOutcome::Duplicate(existing.id));
        }

        let record = CandidateRecord::from_row(row, platform, source_id);
        let outcome = with_retry("insert candidate", || {
            self.candidates.insert_if_absent(&record)
        })
        .await?;
        match outcome {
            InsertOutcome::Created => Ok(UpsertOutcome::Created(record.id)),
            // Lost a race against a parallel upsert for the same key.
            InsertOutcome::Duplicate => Ok(UpsertOutcome::Duplicate(record.id)),
        }
    }

    async fn find_match(&self, row: &CandidateRow) -> Result<Option<CandidateRecord>, AppError> {
        if let Some(url) = row.profile_url.as_deref()
            && let Some(existing) = self.candidates.find_by_profile_url(url).await?
        {
            return Ok(Some(existing));
        }
        if let Some(email) = row.email.as_deref()
            && let Some(existing) = self.candidates.find_by_email(email).await?
        {
            return Ok(Some(existing));
        }
        if let Some(phone) = row.phone.as_deref()
            && let Some(existing) = self.candidates.find_by_phone(phone).await?
        {
            return Ok(Some(existing));
        }
        if let Some(company) = row.company.as_deref()
            && let Some(existing) = self
                .candidates
                .find_by_name_company(&row.name, company)
                .await?
        {
            return Ok(Some(existing));
        }
        Ok(None)
    }

    /// Bulk ingestion path: reuses the dedup rules directly, bypassing the
    /// orchestrator and rate/proxy machinery.
    pub async fn import(
        &self,
        rows: Vec<CandidateRow>,
        platform: Platform,
        source_id: Uuid,
    ) -> Result<ImportSummary, AppError> {
        if rows.is_empty() {
            return Err(AppError::BadRequest("No candidates provided".to_string()));
        }
        if rows.len() > MAX_IMPORT_BATCH {
            return Err(AppError::BadRequest(format!(
                "Import batch exceeds {MAX_IMPORT_BATCH} rows"
            )));
        }

        let mut summary = ImportSummary::default();
        for (idx, row) in rows.into_iter().enumerate() {
            if row.name.trim().is_empty() {
                summary.errors.push(ImportError {
                    row: idx,
                    message: "missing name".to_string(),
                });
                continue;
            }
            match self.upsert(row, platform, source_id).await {
                Ok(UpsertOutcome::Created(_)) => summary.added += 1,
                Ok(UpsertOutcome::Duplicate(_)) => summary.duplicates += 1,
                Err(e) => summary.errors.push(ImportError {
                    row: idx,
                    message: e.to_string(),
                }),
            }
        }
        Ok(summary)
    }
}
