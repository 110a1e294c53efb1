// src/storage/catalog.rs

//! File-backed listing catalog.
//!
//! The whole catalog is one JSON document. Every mutation builds the next
//! version in memory, writes it atomically and only then swaps it in, so a
//! failed write leaves both the file and the in-memory state untouched.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AppError, PersistenceError, Result};
use crate::models::{CanonicalRecord, CrawlSession};
use crate::storage::{CatalogChanges, CatalogStore, CommitSummary, LocalStorage, StoredListing};

const CATALOG_KEY: &str = "catalog.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    listings: BTreeMap<String, StoredListing>,
    #[serde(default)]
    sessions: Vec<CrawlSession>,
}

impl CatalogDocument {
    fn upsert_session(&mut self, session: &CrawlSession) {
        match self
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session.session_id)
        {
            Some(existing) => *existing = session.clone(),
            None => self.sessions.push(session.clone()),
        }
    }

    /// Insert or replace a listing. Returns whether a soft-deleted listing came back.
    fn upsert(
        &mut self,
        record: &CanonicalRecord,
        now: DateTime<Utc>,
    ) -> std::result::Result<bool, PersistenceError> {
        if record.source_id.trim().is_empty() {
            return Err(PersistenceError::new("", "empty source id"));
        }

        let mut record = record.clone();
        record.is_active = true;
        record.last_seen_at = Some(now);

        match self.listings.get_mut(&record.source_id) {
            Some(stored) => {
                let reactivated = !stored.record.is_active;
                stored.record = record;
                stored.updated_at = now;
                Ok(reactivated)
            }
            None => {
                self.listings.insert(
                    record.source_id.clone(),
                    StoredListing {
                        record,
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(false)
            }
        }
    }

    /// Clear `is_active`. Returns whether the listing was active before.
    fn deactivate(
        &mut self,
        source_id: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<bool, PersistenceError> {
        let stored = self
            .listings
            .get_mut(source_id)
            .ok_or_else(|| PersistenceError::new(source_id, "not in catalog"))?;
        if !stored.record.is_active {
            return Ok(false);
        }
        stored.record.is_active = false;
        stored.updated_at = now;
        Ok(true)
    }
}

fn skip_entity(summary: &mut CommitSummary, e: PersistenceError) {
    log::error!("{}", e);
    summary.failures.push(e);
}

/// Catalog held in `{root}/catalog.json`.
pub struct LocalCatalogStore {
    files: LocalStorage,
    state: Mutex<CatalogDocument>,
}

impl LocalCatalogStore {
    /// Open the catalog, starting empty when no file exists yet.
    pub async fn open(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let files = LocalStorage::new(root_dir);
        let state: CatalogDocument = files.read_json(CATALOG_KEY).await?.unwrap_or_default();
        log::debug!(
            "Catalog opened with {} listings and {} sessions",
            state.listings.len(),
            state.sessions.len()
        );
        Ok(Self {
            files,
            state: Mutex::new(state),
        })
    }

    /// Total listings, active or not.
    pub async fn listing_count(&self) -> usize {
        self.state.lock().await.listings.len()
    }
}

#[async_trait]
impl CatalogStore for LocalCatalogStore {
    async fn active_count(&self) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state
            .listings
            .values()
            .filter(|l| l.record.is_active)
            .count())
    }

    async fn begin_session(&self, session: &CrawlSession) -> Result<()> {
        self.record_session(session).await
    }

    async fn commit(
        &self,
        changes: &CatalogChanges,
        session: &CrawlSession,
    ) -> Result<CommitSummary> {
        if !session.is_finalized() {
            return Err(AppError::validation(format!(
                "session {} must be finalized before commit",
                session.session_id
            )));
        }

        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let mut summary = CommitSummary::default();
        let now = changes.seen_at;

        for record in &changes.inserts {
            match next.upsert(record, now) {
                Ok(reactivated) => {
                    summary.inserted += 1;
                    summary.reactivated += usize::from(reactivated);
                }
                Err(e) => skip_entity(&mut summary, e),
            }
        }

        for record in &changes.updates {
            match next.upsert(record, now) {
                Ok(reactivated) => {
                    summary.updated += 1;
                    summary.reactivated += usize::from(reactivated);
                }
                Err(e) => skip_entity(&mut summary, e),
            }
        }

        for source_id in &changes.deactivations {
            match next.deactivate(source_id, now) {
                Ok(true) => summary.deactivated += 1,
                Ok(false) => {}
                Err(e) => skip_entity(&mut summary, e),
            }
        }

        for source_id in &changes.seen_ids {
            if let Some(stored) = next.listings.get_mut(source_id) {
                stored.record.last_seen_at = Some(now);
                summary.refreshed += 1;
            }
        }

        next.upsert_session(session);
        self.files.write_json(CATALOG_KEY, &next).await?;
        *state = next;

        log::info!(
            "Catalog commit: {} inserted ({} reactivated), {} updated, {} deactivated, {} skipped",
            summary.inserted,
            summary.reactivated,
            summary.updated,
            summary.deactivated,
            summary.skipped()
        );
        Ok(summary)
    }

    async fn record_session(&self, session: &CrawlSession) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.upsert_session(session);
        self.files.write_json(CATALOG_KEY, &next).await?;
        *state = next;
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<CrawlSession>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned())
    }

    async fn recent_sessions(&self, limit: usize) -> Result<Vec<CrawlSession>> {
        let state = self.state.lock().await;
        let mut sessions = state.sessions.clone();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn load_listing(&self, source_id: &str) -> Result<Option<StoredListing>> {
        let state = self.state.lock().await;
        Ok(state.listings.get(source_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionCounts, SessionStatus};
    use tempfile::TempDir;

    fn completed_session() -> CrawlSession {
        let mut session = CrawlSession::start();
        session.complete(SessionCounts::default());
        session
    }

    fn changes(inserts: &[&str], deactivations: &[&str]) -> CatalogChanges {
        CatalogChanges {
            inserts: inserts.iter().map(|id| CanonicalRecord::with_id(*id)).collect(),
            updates: Vec::new(),
            deactivations: deactivations.iter().map(|id| id.to_string()).collect(),
            seen_ids: inserts.iter().map(|id| id.to_string()).collect(),
            seen_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let store = LocalCatalogStore::open(tmp.path()).await.unwrap();
        assert_eq!(store.active_count().await.unwrap(), 0);

        let session = completed_session();
        let summary = store
            .commit(&changes(&["1", "2", "3"], &[]), &session)
            .await
            .unwrap();
        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.refreshed, 3);

        let reopened = LocalCatalogStore::open(tmp.path()).await.unwrap();
        assert_eq!(reopened.active_count().await.unwrap(), 3);
        let stored = reopened.load_session(&session.session_id).await.unwrap();
        assert_eq!(stored.unwrap().status, SessionStatus::Completed);
        let listing = reopened.load_listing("2").await.unwrap().unwrap();
        assert!(listing.record.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn test_soft_delete_and_reactivate() {
        let tmp = TempDir::new().unwrap();
        let store = LocalCatalogStore::open(tmp.path()).await.unwrap();

        store
            .commit(&changes(&["1", "2"], &[]), &completed_session())
            .await
            .unwrap();
        let summary = store
            .commit(&changes(&[], &["2"]), &completed_session())
            .await
            .unwrap();
        assert_eq!(summary.deactivated, 1);
        assert_eq!(store.active_count().await.unwrap(), 1);

        let listing = store.load_listing("2").await.unwrap().unwrap();
        assert!(!listing.record.is_active);

        let summary = store
            .commit(&changes(&["2"], &[]), &completed_session())
            .await
            .unwrap();
        assert_eq!(summary.reactivated, 1);
        assert_eq!(store.active_count().await.unwrap(), 2);
        assert_eq!(store.listing_count().await, 2);

        let listing = store.load_listing("2").await.unwrap().unwrap();
        assert!(listing.record.is_active);
        assert!(listing.updated_at >= listing.created_at);
    }

    #[tokio::test]
    async fn test_entity_failures_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = LocalCatalogStore::open(tmp.path()).await.unwrap();

        let summary = store
            .commit(&changes(&["1", "", "3"], &["missing"]), &completed_session())
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped(), 2);
        assert_eq!(summary.failures[1].source_id, "missing");
        assert_eq!(store.active_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_running_session_cannot_commit() {
        let tmp = TempDir::new().unwrap();
        let store = LocalCatalogStore::open(tmp.path()).await.unwrap();

        let result = store
            .commit(&changes(&["1"], &[]), &CrawlSession::start())
            .await;
        assert!(result.is_err());
        assert_eq!(store.listing_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = LocalCatalogStore::open(tmp.path()).await.unwrap();

        // A directory where the catalog file belongs makes the rename fail.
        std::fs::create_dir(tmp.path().join(CATALOG_KEY)).unwrap();

        let result = store
            .commit(&changes(&["1", "2"], &[]), &completed_session())
            .await;
        assert!(result.is_err());
        assert_eq!(store.active_count().await.unwrap(), 0);
        assert!(store.recent_sessions(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_sessions_newest_first() {
        let tmp = TempDir::new().unwrap();
        let store = LocalCatalogStore::open(tmp.path()).await.unwrap();

        let mut first = CrawlSession::start();
        first.started_at = Utc::now() - chrono::Duration::hours(2);
        let second = CrawlSession::start();
        store.begin_session(&first).await.unwrap();
        store.begin_session(&second).await.unwrap();

        first.fail("hard time limit");
        store.record_session(&first).await.unwrap();

        let sessions = store.recent_sessions(5).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, second.session_id);
        assert_eq!(sessions[1].status, SessionStatus::Failed);
    }
}
