//! Storage abstractions for snapshots and the listing catalog.
//!
//! Two collaborators sit behind async traits:
//! - [`SnapshotStore`]: the previous run's snapshot and per-run change documents
//! - [`CatalogStore`]: the system of record for listings and crawl sessions
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── config.toml           # Crawler configuration
//! ├── current.json          # Snapshot of the last successful run
//! ├── catalog.json          # Listings and session audit log
//! └── changes/              # Change documents of incremental runs
//!     ├── new_20250101_120000.json
//!     ├── updated_20250101_120000.json
//!     └── removed_20250101_120000.json
//! ```

mod catalog;
pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, Result};
use crate::models::{CanonicalRecord, ChangeArtifacts, CrawlSession, SnapshotDocument};

// Re-export for convenience
pub use catalog::LocalCatalogStore;
pub use local::LocalStorage;

/// Trait for snapshot storage backends.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the previous snapshot. `None` when no run has completed yet.
    async fn load_snapshot(&self) -> Result<Option<SnapshotDocument>>;

    /// Replace the snapshot.
    async fn save_snapshot(&self, document: &SnapshotDocument) -> Result<()>;

    /// Write the change documents of one run. Returns the keys written.
    async fn write_artifacts(&self, artifacts: &ChangeArtifacts) -> Result<Vec<String>>;
}

/// A listing as held by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredListing {
    #[serde(flatten)]
    pub record: CanonicalRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything one reconciliation writes to the catalog.
#[derive(Debug, Clone)]
pub struct CatalogChanges {
    /// Listings not in the previous snapshot
    pub inserts: Vec<CanonicalRecord>,
    /// Listings whose watched fields changed
    pub updates: Vec<CanonicalRecord>,
    /// Listings to soft-delete
    pub deactivations: Vec<String>,
    /// Every id seen this run; their `last_seen_at` is refreshed
    pub seen_ids: Vec<String>,
    pub seen_at: DateTime<Utc>,
}

/// What a commit actually applied.
#[derive(Debug, Clone, Default)]
pub struct CommitSummary {
    pub inserted: usize,
    /// Inserts or updates that brought back a soft-deleted listing
    pub reactivated: usize,
    pub updated: usize,
    pub deactivated: usize,
    pub refreshed: usize,
    /// Entities skipped because they could not be written
    pub failures: Vec<PersistenceError>,
}

impl CommitSummary {
    pub fn skipped(&self) -> usize {
        self.failures.len()
    }
}

/// Trait for catalog backends.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Number of listings with `is_active = true`.
    async fn active_count(&self) -> Result<usize>;

    /// Record a freshly started session.
    async fn begin_session(&self, session: &CrawlSession) -> Result<()>;

    /// Apply all changes and store the finalized session as one atomic unit.
    ///
    /// Single entities that cannot be written are skipped and reported in the
    /// summary. Any error return means nothing was applied.
    async fn commit(
        &self,
        changes: &CatalogChanges,
        session: &CrawlSession,
    ) -> Result<CommitSummary>;

    /// Store a session without touching listings.
    async fn record_session(&self, session: &CrawlSession) -> Result<()>;

    async fn load_session(&self, session_id: &str) -> Result<Option<CrawlSession>>;

    /// Most recent sessions, newest first.
    async fn recent_sessions(&self, limit: usize) -> Result<Vec<CrawlSession>>;

    async fn load_listing(&self, source_id: &str) -> Result<Option<StoredListing>>;
}
