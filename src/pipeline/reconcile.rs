// src/pipeline/reconcile.rs

//! Reconciliation of a crawled aggregate against the catalog.
//!
//! Decides between bootstrap and incremental classification, commits all
//! catalog changes together with the finalized session, then writes change
//! documents and the next snapshot.

use chrono::Utc;

use crate::error::Result;
use crate::models::{
    CanonicalRecord, ChangeArtifacts, CrawlSession, SessionCounts, Snapshot, SnapshotDocument,
    UpdatedListing,
};
use crate::pipeline::DiffEngine;
use crate::storage::{CatalogChanges, CatalogStore, CommitSummary, SnapshotStore};

/// How much of the catalog the aggregate covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Every configuration finished; absence means removal.
    Complete,
    /// The crawl was cut short; removals are suppressed.
    Partial,
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    /// The catalog held no active listings, so nothing was diffed
    pub bootstrap: bool,
    /// Incremental run without a previous snapshot; everything counted as new
    pub snapshot_missing: bool,
    pub mode: ReconcileMode,
    pub counts: SessionCounts,
    pub commit: CommitSummary,
    /// Change document keys written
    pub artifacts: Vec<String>,
    /// `false` if the snapshot could not be written after the commit
    pub snapshot_saved: bool,
}

/// Classified changes before they are written.
struct Classification {
    new_records: Vec<CanonicalRecord>,
    updated: Vec<UpdatedListing>,
    removed_ids: Vec<String>,
    previous: Option<Snapshot>,
    snapshot_missing: bool,
}

/// Applies one run's aggregate to the stores.
pub struct Reconciler<'a> {
    catalog: &'a dyn CatalogStore,
    snapshots: &'a dyn SnapshotStore,
    engine: DiffEngine,
}

impl<'a> Reconciler<'a> {
    pub fn new(catalog: &'a dyn CatalogStore, snapshots: &'a dyn SnapshotStore) -> Self {
        Self {
            catalog,
            snapshots,
            engine: DiffEngine::new(),
        }
    }

    /// Reconcile `current` and finalize `session` as completed.
    ///
    /// On error nothing was committed and `session` is left running.
    pub async fn reconcile(
        &self,
        current: Snapshot,
        mode: ReconcileMode,
        session: &mut CrawlSession,
    ) -> Result<ReconcileReport> {
        let active = self.catalog.active_count().await?;
        let bootstrap = active == 0;

        let classification = if bootstrap {
            log::info!(
                "Bootstrap run: catalog is empty, all {} listings are new",
                current.len()
            );
            Classification {
                new_records: sorted_records(&current),
                updated: Vec::new(),
                removed_ids: Vec::new(),
                previous: None,
                snapshot_missing: false,
            }
        } else {
            self.classify(&current, mode, active).await?
        };

        let counts = SessionCounts {
            total_found: current.len(),
            new_count: classification.new_records.len(),
            updated_count: classification.updated.len(),
            removed_count: classification.removed_ids.len(),
        };

        let seen_at = Utc::now();
        let changes = CatalogChanges {
            inserts: classification.new_records.clone(),
            updates: classification
                .updated
                .iter()
                .map(|u| u.record.clone())
                .collect(),
            deactivations: classification.removed_ids.clone(),
            seen_ids: current.keys().cloned().collect(),
            seen_at,
        };

        let mut finalized = session.clone();
        finalized.complete(counts);
        let commit = self.catalog.commit(&changes, &finalized).await?;
        *session = finalized;

        let mut artifacts = Vec::new();
        if !bootstrap {
            let documents = ChangeArtifacts {
                session_id: session.session_id.clone(),
                timestamp: seen_at,
                new_cars: classification.new_records,
                updated_cars: classification.updated,
                removed_ids: classification.removed_ids,
            };
            if !documents.is_empty() {
                match self.snapshots.write_artifacts(&documents).await {
                    Ok(keys) => artifacts = keys,
                    Err(e) => log::error!("Failed to write change documents: {}", e),
                }
            }
        }

        let next = match (mode, classification.previous) {
            (ReconcileMode::Partial, Some(mut previous)) => {
                previous.extend(current);
                previous
            }
            _ => current,
        };
        let document = SnapshotDocument::new(session.session_id.clone(), &next);
        let snapshot_saved = match self.snapshots.save_snapshot(&document).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Catalog committed but snapshot write failed: {}", e);
                false
            }
        };

        log::info!(
            "Reconciled {} listings: {} new, {} updated, {} removed",
            counts.total_found,
            counts.new_count,
            counts.updated_count,
            counts.removed_count
        );

        Ok(ReconcileReport {
            bootstrap,
            snapshot_missing: classification.snapshot_missing,
            mode,
            counts,
            commit,
            artifacts,
            snapshot_saved,
        })
    }

    async fn classify(
        &self,
        current: &Snapshot,
        mode: ReconcileMode,
        active: usize,
    ) -> Result<Classification> {
        let Some(document) = self.snapshots.load_snapshot().await? else {
            log::warn!(
                "No previous snapshot while the catalog holds {} active listings; \
                 treating all {} listings as new",
                active,
                current.len()
            );
            return Ok(Classification {
                new_records: sorted_records(current),
                updated: Vec::new(),
                removed_ids: Vec::new(),
                previous: None,
                snapshot_missing: true,
            });
        };

        let previous_session = document.session_id.clone();
        let previous = document.into_snapshot();
        let mut diff = self.engine.diff(current, &previous);
        log::info!(
            "Diff against snapshot of session {}: {} changes",
            previous_session,
            diff.change_count()
        );
        if mode == ReconcileMode::Partial && !diff.removed_ids.is_empty() {
            log::info!(
                "Partial crawl: not soft-deleting {} listings missing from the aggregate",
                diff.removed_ids.len()
            );
            diff.removed_ids.clear();
        }

        Ok(Classification {
            new_records: diff.new_records,
            updated: diff.updated,
            removed_ids: diff.removed_ids,
            previous: Some(previous),
            snapshot_missing: false,
        })
    }
}

fn sorted_records(snapshot: &Snapshot) -> Vec<CanonicalRecord> {
    let mut records: Vec<CanonicalRecord> = snapshot.values().cloned().collect();
    records.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::SessionStatus;
    use crate::storage::{LocalCatalogStore, LocalStorage, StoredListing};
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn listing(id: &str, price: f64) -> CanonicalRecord {
        let mut record = CanonicalRecord::with_id(id);
        record.price = Some(price);
        record
    }

    fn snapshot(records: impl IntoIterator<Item = CanonicalRecord>) -> Snapshot {
        records
            .into_iter()
            .map(|r| (r.source_id.clone(), r))
            .collect()
    }

    async fn stores(tmp: &TempDir) -> (LocalCatalogStore, LocalStorage) {
        (
            LocalCatalogStore::open(tmp.path()).await.unwrap(),
            LocalStorage::new(tmp.path()),
        )
    }

    async fn run(
        catalog: &dyn CatalogStore,
        snapshots: &dyn SnapshotStore,
        current: Snapshot,
        mode: ReconcileMode,
    ) -> Result<(ReconcileReport, CrawlSession)> {
        let mut session = CrawlSession::start();
        let report = Reconciler::new(catalog, snapshots)
            .reconcile(current, mode, &mut session)
            .await?;
        Ok((report, session))
    }

    #[tokio::test]
    async fn test_bootstrap_run() {
        let tmp = TempDir::new().unwrap();
        let (catalog, files) = stores(&tmp).await;

        let current = snapshot([listing("A", 1.0), listing("B", 2.0), listing("C", 3.0)]);
        let (report, session) = run(&catalog, &files, current, ReconcileMode::Complete)
            .await
            .unwrap();

        assert!(report.bootstrap);
        assert_eq!(report.counts.new_count, 3);
        assert_eq!(report.counts.updated_count, 0);
        assert_eq!(report.counts.removed_count, 0);
        assert!(report.artifacts.is_empty());
        assert!(report.snapshot_saved);
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.new_count, 3);
        assert_eq!(catalog.active_count().await.unwrap(), 3);
        assert_eq!(files.load_snapshot().await.unwrap().unwrap().total_cars, 3);
    }

    #[tokio::test]
    async fn test_incremental_run() {
        let tmp = TempDir::new().unwrap();
        let (catalog, files) = stores(&tmp).await;

        let first = snapshot([listing("A", 100.0), listing("C", 50.0)]);
        run(&catalog, &files, first, ReconcileMode::Complete)
            .await
            .unwrap();

        let second = snapshot([listing("A", 120.0), listing("B", 10.0)]);
        let (report, session) = run(&catalog, &files, second, ReconcileMode::Complete)
            .await
            .unwrap();

        assert!(!report.bootstrap);
        assert_eq!(session.new_count, 1);
        assert_eq!(session.updated_count, 1);
        assert_eq!(session.removed_count, 1);
        assert_eq!(report.artifacts.len(), 3);
        assert_eq!(catalog.active_count().await.unwrap(), 2);

        let c = catalog.load_listing("C").await.unwrap().unwrap();
        assert!(!c.record.is_active);
        let a = catalog.load_listing("A").await.unwrap().unwrap();
        assert_eq!(a.record.price, Some(120.0));
    }

    #[tokio::test]
    async fn test_unchanged_rerun_has_no_changes() {
        let tmp = TempDir::new().unwrap();
        let (catalog, files) = stores(&tmp).await;

        let current = snapshot([listing("A", 1.0), listing("B", 2.0)]);
        run(&catalog, &files, current.clone(), ReconcileMode::Complete)
            .await
            .unwrap();
        let (report, _) = run(&catalog, &files, current, ReconcileMode::Complete)
            .await
            .unwrap();

        assert_eq!(report.counts.new_count, 0);
        assert_eq!(report.counts.updated_count, 0);
        assert_eq!(report.counts.removed_count, 0);
        assert!(report.artifacts.is_empty());
        assert_eq!(report.commit.refreshed, 2);
    }

    #[tokio::test]
    async fn test_missing_snapshot_treats_everything_as_new() {
        let tmp = TempDir::new().unwrap();
        let (catalog, files) = stores(&tmp).await;

        let current = snapshot([listing("A", 1.0), listing("B", 2.0)]);
        run(&catalog, &files, current.clone(), ReconcileMode::Complete)
            .await
            .unwrap();
        std::fs::remove_file(files.path("current.json")).unwrap();

        let (report, session) = run(&catalog, &files, current, ReconcileMode::Complete)
            .await
            .unwrap();

        assert!(!report.bootstrap);
        assert!(report.snapshot_missing);
        assert_eq!(session.new_count, 2);
        assert_eq!(session.removed_count, 0);
        // Upserts keep the catalog free of duplicates.
        assert_eq!(catalog.listing_count().await, 2);
        assert_eq!(catalog.active_count().await.unwrap(), 2);
        assert!(files.load_snapshot().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_partial_run_suppresses_removals() {
        let tmp = TempDir::new().unwrap();
        let (catalog, files) = stores(&tmp).await;

        let first = snapshot([listing("A", 1.0), listing("B", 2.0), listing("C", 3.0)]);
        run(&catalog, &files, first, ReconcileMode::Complete)
            .await
            .unwrap();

        let partial = snapshot([listing("A", 5.0), listing("D", 4.0)]);
        let (report, _) = run(&catalog, &files, partial, ReconcileMode::Partial)
            .await
            .unwrap();

        assert_eq!(report.mode, ReconcileMode::Partial);
        assert_eq!(report.counts.new_count, 1);
        assert_eq!(report.counts.updated_count, 1);
        assert_eq!(report.counts.removed_count, 0);
        assert_eq!(catalog.active_count().await.unwrap(), 4);

        // The next snapshot still knows the listings the partial crawl missed.
        let next = files.load_snapshot().await.unwrap().unwrap().into_snapshot();
        assert_eq!(next.len(), 4);
        assert_eq!(next["A"].price, Some(5.0));
        assert!(next.contains_key("C"));
    }

    #[tokio::test]
    async fn test_reappearing_listing_is_reactivated() {
        let tmp = TempDir::new().unwrap();
        let (catalog, files) = stores(&tmp).await;

        run(
            &catalog,
            &files,
            snapshot([listing("A", 1.0), listing("B", 2.0)]),
            ReconcileMode::Complete,
        )
        .await
        .unwrap();
        run(
            &catalog,
            &files,
            snapshot([listing("A", 1.0)]),
            ReconcileMode::Complete,
        )
        .await
        .unwrap();
        assert!(!catalog.load_listing("B").await.unwrap().unwrap().record.is_active);

        let (report, _) = run(
            &catalog,
            &files,
            snapshot([listing("A", 1.0), listing("B", 2.0)]),
            ReconcileMode::Complete,
        )
        .await
        .unwrap();

        assert_eq!(report.counts.new_count, 1);
        assert_eq!(report.commit.reactivated, 1);
        let b = catalog.load_listing("B").await.unwrap().unwrap();
        assert!(b.record.is_active);
        assert_eq!(catalog.listing_count().await, 2);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_fails_without_changes() {
        let tmp = TempDir::new().unwrap();
        let (catalog, files) = stores(&tmp).await;

        run(
            &catalog,
            &files,
            snapshot([listing("A", 1.0)]),
            ReconcileMode::Complete,
        )
        .await
        .unwrap();
        std::fs::write(files.path("current.json"), b"garbage").unwrap();

        let mut session = CrawlSession::start();
        let result = Reconciler::new(&catalog, &files)
            .reconcile(
                snapshot([listing("B", 2.0)]),
                ReconcileMode::Complete,
                &mut session,
            )
            .await;

        assert!(matches!(result, Err(AppError::Snapshot(_))));
        assert_eq!(session.status, SessionStatus::Running);
        assert!(catalog.load_listing("B").await.unwrap().is_none());
        assert!(catalog.load_listing("A").await.unwrap().unwrap().record.is_active);
    }

    /// Catalog whose commit always fails.
    struct BrokenCatalog(LocalCatalogStore);

    #[async_trait]
    impl CatalogStore for BrokenCatalog {
        async fn active_count(&self) -> Result<usize> {
            self.0.active_count().await
        }
        async fn begin_session(&self, session: &CrawlSession) -> Result<()> {
            self.0.begin_session(session).await
        }
        async fn commit(&self, _: &CatalogChanges, _: &CrawlSession) -> Result<CommitSummary> {
            Err(AppError::Io(std::io::Error::other("disk full")))
        }
        async fn record_session(&self, session: &CrawlSession) -> Result<()> {
            self.0.record_session(session).await
        }
        async fn load_session(&self, session_id: &str) -> Result<Option<CrawlSession>> {
            self.0.load_session(session_id).await
        }
        async fn recent_sessions(&self, limit: usize) -> Result<Vec<CrawlSession>> {
            self.0.recent_sessions(limit).await
        }
        async fn load_listing(&self, source_id: &str) -> Result<Option<StoredListing>> {
            self.0.load_listing(source_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let (catalog, files) = stores(&tmp).await;
        let catalog = BrokenCatalog(catalog);

        let mut session = CrawlSession::start();
        let result = Reconciler::new(&catalog, &files)
            .reconcile(
                snapshot([listing("A", 1.0)]),
                ReconcileMode::Complete,
                &mut session,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(session.status, SessionStatus::Running);
        assert!(files.load_snapshot().await.unwrap().is_none());
        assert_eq!(catalog.active_count().await.unwrap(), 0);
    }
}
