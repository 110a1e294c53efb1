//! Snapshot and change artifact documents.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CanonicalRecord;

/// All listings seen as of one run, keyed by source id.
pub type Snapshot = HashMap<String, CanonicalRecord>;

/// On-disk form of a [`Snapshot`]. Fully overwritten after each run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub total_cars: usize,
    pub cars: Vec<CanonicalRecord>,
}

impl SnapshotDocument {
    /// Build a document from a snapshot, ordered by source id.
    pub fn new(session_id: impl Into<String>, snapshot: &Snapshot) -> Self {
        let mut cars: Vec<CanonicalRecord> = snapshot.values().cloned().collect();
        cars.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            total_cars: cars.len(),
            cars,
        }
    }

    /// Key the listings by source id. A repeated id keeps its first occurrence.
    pub fn into_snapshot(self) -> Snapshot {
        let mut snapshot = Snapshot::with_capacity(self.cars.len());
        for car in self.cars {
            snapshot.entry(car.source_id.clone()).or_insert(car);
        }
        snapshot
    }
}

/// A listing reported as updated, with its per-field changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatedListing {
    #[serde(flatten)]
    pub record: CanonicalRecord,
    pub changes: crate::pipeline::Changeset,
}

/// Per-run change documents written on incremental runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeArtifacts {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub new_cars: Vec<CanonicalRecord>,
    pub updated_cars: Vec<UpdatedListing>,
    pub removed_ids: Vec<String>,
}

impl ChangeArtifacts {
    pub fn is_empty(&self) -> bool {
        self.new_cars.is_empty() && self.updated_cars.is_empty() && self.removed_ids.is_empty()
    }
}
