//! Local filesystem storage implementation.
//!
//! Holds the snapshot of the last successful run and the change documents of
//! incremental runs.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── current.json          # Snapshot document
//! └── changes/
//!     ├── new_YYYYMMDD_HHMMSS.json
//!     ├── updated_YYYYMMDD_HHMMSS.json
//!     └── removed_YYYYMMDD_HHMMSS.json
//! ```
//!
//! Every write goes to a temporary file first and is renamed into place, so a
//! reader never observes a half-written document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{CanonicalRecord, ChangeArtifacts, SnapshotDocument, UpdatedListing};
use crate::storage::SnapshotStore;

const SNAPSHOT_KEY: &str = "current.json";

/// One change document on disk.
#[derive(Serialize)]
struct ArtifactDocument<'a> {
    session_id: &'a str,
    timestamp: DateTime<Utc>,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    cars: Option<&'a [CanonicalRecord]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_cars: Option<&'a [UpdatedListing]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    removed_ids: Option<&'a [String]>,
}

impl<'a> ArtifactDocument<'a> {
    fn empty(artifacts: &'a ChangeArtifacts, count: usize) -> Self {
        Self {
            session_id: &artifacts.session_id,
            timestamp: artifacts.timestamp,
            count,
            cars: None,
            updated_cars: None,
            removed_ids: None,
        }
    }
}

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    pub fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    pub(crate) async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    pub async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    pub(crate) async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    pub(crate) async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Key of one change document, e.g. `changes/new_20250101_120000.json`.
    fn artifact_key(kind: &str, timestamp: DateTime<Utc>) -> String {
        format!("changes/{}_{}.json", kind, timestamp.format("%Y%m%d_%H%M%S"))
    }
}

#[async_trait]
impl SnapshotStore for LocalStorage {
    async fn load_snapshot(&self) -> Result<Option<SnapshotDocument>> {
        let Some(bytes) = self.read_bytes(SNAPSHOT_KEY).await? else {
            log::warn!("No {} found in {}", SNAPSHOT_KEY, self.root_dir.display());
            return Ok(None);
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            AppError::snapshot(format!(
                "{} is unreadable: {}",
                self.path(SNAPSHOT_KEY).display(),
                e
            ))
        })
    }

    async fn save_snapshot(&self, document: &SnapshotDocument) -> Result<()> {
        self.write_json(SNAPSHOT_KEY, document).await?;
        log::info!(
            "Snapshot: {} listings written to {}",
            document.total_cars,
            SNAPSHOT_KEY
        );
        Ok(())
    }

    async fn write_artifacts(&self, artifacts: &ChangeArtifacts) -> Result<Vec<String>> {
        let mut written = Vec::new();

        if !artifacts.new_cars.is_empty() {
            let key = Self::artifact_key("new", artifacts.timestamp);
            let document = ArtifactDocument {
                cars: Some(artifacts.new_cars.as_slice()),
                ..ArtifactDocument::empty(artifacts, artifacts.new_cars.len())
            };
            self.write_json(&key, &document).await?;
            written.push(key);
        }

        if !artifacts.updated_cars.is_empty() {
            let key = Self::artifact_key("updated", artifacts.timestamp);
            let document = ArtifactDocument {
                updated_cars: Some(artifacts.updated_cars.as_slice()),
                ..ArtifactDocument::empty(artifacts, artifacts.updated_cars.len())
            };
            self.write_json(&key, &document).await?;
            written.push(key);
        }

        if !artifacts.removed_ids.is_empty() {
            let key = Self::artifact_key("removed", artifacts.timestamp);
            let document = ArtifactDocument {
                removed_ids: Some(artifacts.removed_ids.as_slice()),
                ..ArtifactDocument::empty(artifacts, artifacts.removed_ids.len())
            };
            self.write_json(&key, &document).await?;
            written.push(key);
        }

        for key in &written {
            log::info!("Change document written to {}", key);
        }
        Ok(written)
    }
}
