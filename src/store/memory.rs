use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::audit::AuditEvent;
use crate::models::candidate::{CandidateFilters, CandidateRecord};
use crate::models::proxy::ProxyPoolState;
use crate::models::run::ScrapeRun;
use crate::models::source::{CandidateSource, SourceStats, SourceStatus};
use crate::store::{AuditStore, CandidateStore, InsertOutcome, SourceStore};

/// In-memory store backing local development (no DATABASE_URL) and tests.
/// Same contracts as the Postgres store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    sources: RwLock<HashMap<Uuid, CandidateSource>>,
    leases: RwLock<HashMap<Uuid, (Uuid, DateTime<Utc>)>>,
    candidates: RwLock<Vec<CandidateRecord>>,
    audit: RwLock<Vec<AuditEvent>>,
}

impl MemoryStore {
    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.read().await.clone()
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn insert(&self, source: &CandidateSource) -> Result<(), AppError> {
        self.sources
            .write()
            .await
            .insert(source.id, source.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<CandidateSource, AppError> {
        self.sources
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Source {id} not found")))
    }

    async fn list(&self) -> Result<Vec<CandidateSource>, AppError> {
        let mut sources: Vec<_> = self.sources.read().await.values().cloned().collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }

    async fn update(&self, source: &CandidateSource) -> Result<(), AppError> {
        let mut sources = self.sources.write().await;
        if !sources.contains_key(&source.id) {
            return Err(AppError::NotFound(format!("Source {} not found", source.id)));
        }
        let mut updated = source.clone();
        updated.updated_at = Utc::now();
        sources.insert(source.id, updated);
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<CandidateSource>, AppError> {
        Ok(self
            .sources
            .read()
            .await
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect())
    }

    async fn set_next_run(&self, id: Uuid, when: Option<DateTime<Utc>>) -> Result<(), AppError> {
        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Source {id} not found")))?;
        source.schedule.next_run_at = when;
        source.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: SourceStatus) -> Result<(), AppError> {
        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Source {id} not found")))?;
        source.status = status;
        source.updated_at = Utc::now();
        Ok(())
    }

    async fn save_proxy_state(&self, id: Uuid, state: &ProxyPoolState) -> Result<(), AppError> {
        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Source {id} not found")))?;
        source.proxies = state.clone();
        source.updated_at = Utc::now();
        Ok(())
    }

    async fn save_run_history(
        &self,
        id: Uuid,
        history: &[ScrapeRun],
        stats: &SourceStats,
    ) -> Result<(), AppError> {
        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Source {id} not found")))?;
        source.run_history = history.to_vec();
        source.stats = stats.clone();
        source.updated_at = Utc::now();
        Ok(())
    }

    async fn acquire_lease(
        &self,
        id: Uuid,
        owner: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut leases = self.leases.write().await;
        let now = Utc::now();
        match leases.get(&id) {
            Some((_, expiry)) if *expiry > now => Ok(false),
            _ => {
                leases.insert(id, (owner, expires_at));
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, id: Uuid, owner: Uuid) -> Result<(), AppError> {
        let mut leases = self.leases.write().await;
        if leases.get(&id).is_some_and(|(o, _)| *o == owner) {
            leases.remove(&id);
        }
        Ok(())
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        let mut leases = self.leases.write().await;
        let expired: Vec<Uuid> = leases
            .iter()
            .filter(|(_, (_, expiry))| *expiry <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            leases.remove(id);
        }
        Ok(expired)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[async_trait]
impl CandidateStore for MemoryStore {
    async fn insert_if_absent(&self, record: &CandidateRecord) -> Result<InsertOutcome, AppError> {
        let mut candidates = self.candidates.write().await;
        let conflict = candidates.iter().any(|existing| {
            matches_key(&existing.profile_url, &record.profile_url)
                || matches_key(&existing.email, &record.email)
                || existing.phone.is_some() && existing.phone == record.phone
        });
        if conflict {
            return Ok(InsertOutcome::Duplicate);
        }
        candidates.push(record.clone());
        Ok(InsertOutcome::Created)
    }

    async fn find_by_profile_url(&self, url: &str) -> Result<Option<CandidateRecord>, AppError> {
        Ok(self
            .candidates
            .read()
            .await
            .iter()
            .find(|c| c.profile_url.as_deref().is_some_and(|u| eq_ignore_case(u, url)))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<CandidateRecord>, AppError> {
        Ok(self
            .candidates
            .read()
            .await
            .iter()
            .find(|c| c.email.as_deref().is_some_and(|e| eq_ignore_case(e, email)))
            .cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<CandidateRecord>, AppError> {
        Ok(self
            .candidates
            .read()
            .await
            .iter()
            .find(|c| c.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn find_by_name_company(
        &self,
        name: &str,
        company: &str,
    ) -> Result<Option<CandidateRecord>, AppError> {
        Ok(self
            .candidates
            .read()
            .await
            .iter()
            .find(|c| {
                eq_ignore_case(&c.name, name)
                    && c.company.as_deref().is_some_and(|co| eq_ignore_case(co, company))
            })
            .cloned())
    }

    async fn list(&self, filters: &CandidateFilters) -> Result<Vec<CandidateRecord>, AppError> {
        let per_page = filters.per_page.unwrap_or(50).min(100).max(1) as usize;
        let offset = ((filters.page.unwrap_or(1) - 1).max(0) as usize) * per_page;
        let candidates = self.candidates.read().await;
        Ok(candidates
            .iter()
            .filter(|c| filters.source_id.is_none() || c.source_id == filters.source_id)
            .filter(|c| {
                filters.search.as_deref().is_none_or(|q| {
                    let q = q.to_ascii_lowercase();
                    c.name.to_ascii_lowercase().contains(&q)
                        || c.title
                            .as_deref()
                            .is_some_and(|t| t.to_ascii_lowercase().contains(&q))
                })
            })
            .skip(offset)
            .take(per_page)
            .cloned()
            .collect())
    }
}

fn matches_key(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn record(&self, event: &AuditEvent) -> Result<(), AppError> {
        self.audit.write().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::source::Platform;

    #[tokio::test]
    async fn lease_is_exclusive_until_expiry() {
        let store = MemoryStore::default();
        let source = CandidateSource::new("s", Platform::Jobboard);
        SourceStore::insert(&store, &source).await.unwrap();

        let owner_a = Uuid::new_v4();
        let owner_b = Uuid::new_v4();
        let future = Utc::now() + chrono::Duration::minutes(10);

        assert!(store.acquire_lease(source.id, owner_a, future).await.unwrap());
        assert!(!store.acquire_lease(source.id, owner_b, future).await.unwrap());

        // Release by the wrong owner is a no-op.
        store.release_lease(source.id, owner_b).await.unwrap();
        assert!(!store.acquire_lease(source.id, owner_b, future).await.unwrap());

        store.release_lease(source.id, owner_a).await.unwrap();
        assert!(store.acquire_lease(source.id, owner_b, future).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let store = MemoryStore::default();
        let source = CandidateSource::new("s", Platform::Jobboard);
        SourceStore::insert(&store, &source).await.unwrap();

        let past = Utc::now() - chrono::Duration::minutes(1);
        assert!(store.acquire_lease(source.id, Uuid::new_v4(), past).await.unwrap());
        assert!(
            store
                .acquire_lease(source.id, Uuid::new_v4(), Utc::now() + chrono::Duration::minutes(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn reap_returns_only_expired() {
        let store = MemoryStore::default();
        let a = CandidateSource::new("a", Platform::Jobboard);
        let b = CandidateSource::new("b", Platform::Jobboard);
        SourceStore::insert(&store, &a).await.unwrap();
        SourceStore::insert(&store, &b).await.unwrap();

        let now = Utc::now();
        store
            .acquire_lease(a.id, Uuid::new_v4(), now - chrono::Duration::seconds(1))
            .await
            .unwrap();
        store
            .acquire_lease(b.id, Uuid::new_v4(), now + chrono::Duration::minutes(5))
            .await
            .unwrap();

        let reaped = store.reap_expired_leases(now).await.unwrap();
        assert_eq!(reaped, vec![a.id]);
    }
}
