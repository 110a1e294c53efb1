//! Snapshot diffing.
//!
//! Computes the difference between the current and previous snapshots to
//! classify new, updated and removed listings. Only the watched fields are
//! compared; drift elsewhere never surfaces as a change.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{CanonicalRecord, Snapshot, UpdatedListing};

/// A field whose change marks a listing as updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedField {
    Price,
    Mileage,
    SalesStatus,
    ModifiedDate,
    OfficeCityState,
    OfficeName,
    DealerName,
}

impl WatchedField {
    pub const ALL: [WatchedField; 7] = [
        Self::Price,
        Self::Mileage,
        Self::SalesStatus,
        Self::ModifiedDate,
        Self::OfficeCityState,
        Self::OfficeName,
        Self::DealerName,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Mileage => "mileage",
            Self::SalesStatus => "sales_status",
            Self::ModifiedDate => "modified_date",
            Self::OfficeCityState => "office_city_state",
            Self::OfficeName => "office_name",
            Self::DealerName => "dealer_name",
        }
    }

    /// The field's value in comparable form. Absent values are `null`.
    pub fn value(&self, record: &CanonicalRecord) -> Value {
        match self {
            Self::Price => Value::from(record.price),
            Self::Mileage => Value::from(record.mileage),
            Self::SalesStatus => Value::from(record.sales_status.as_str()),
            Self::ModifiedDate => Value::from(record.modified_date.map(|d| d.to_string())),
            Self::OfficeCityState => Value::from(record.office_city_state.as_str()),
            Self::OfficeName => Value::from(record.office_name.as_str()),
            Self::DealerName => Value::from(record.dealer_name.as_str()),
        }
    }
}

impl fmt::Display for WatchedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Old and new value of one watched field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// Per-field changes of one listing, keyed by field name.
pub type Changeset = BTreeMap<String, FieldChange>;

/// Classified difference between two snapshots. Every list is ordered by id.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub new_records: Vec<CanonicalRecord>,
    pub updated: Vec<UpdatedListing>,
    pub removed_ids: Vec<String>,
}

impl DiffResult {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.new_records.is_empty() || !self.updated.is_empty() || !self.removed_ids.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.new_records.len() + self.updated.len() + self.removed_ids.len()
    }
}

/// Compares snapshots over a fixed set of watched fields.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    watched: Vec<WatchedField>,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffEngine {
    /// Create an engine watching every field in [`WatchedField::ALL`].
    pub fn new() -> Self {
        Self {
            watched: WatchedField::ALL.to_vec(),
        }
    }

    /// Changes between two versions of the same listing.
    pub fn changeset(&self, old: &CanonicalRecord, new: &CanonicalRecord) -> Changeset {
        self.watched
            .iter()
            .filter_map(|field| {
                let old_value = field.value(old);
                let new_value = field.value(new);
                (old_value != new_value).then(|| {
                    (
                        field.as_str().to_string(),
                        FieldChange {
                            old: old_value,
                            new: new_value,
                        },
                    )
                })
            })
            .collect()
    }

    /// Classify `current` against `previous`.
    pub fn diff(&self, current: &Snapshot, previous: &Snapshot) -> DiffResult {
        let mut result = DiffResult::default();

        for (id, record) in current {
            match previous.get(id) {
                None => result.new_records.push(record.clone()),
                Some(old) => {
                    let changes = self.changeset(old, record);
                    if !changes.is_empty() {
                        result.updated.push(UpdatedListing {
                            record: record.clone(),
                            changes,
                        });
                    }
                }
            }
        }

        result.removed_ids = previous
            .keys()
            .filter(|id| !current.contains_key(*id))
            .cloned()
            .collect();

        result
            .new_records
            .sort_by(|a, b| a.source_id.cmp(&b.source_id));
        result
            .updated
            .sort_by(|a, b| a.record.source_id.cmp(&b.record.source_id));
        result.removed_ids.sort();
        result
    }
}

/// Convenience function to diff with the default watched fields.
pub fn calculate_diff(current: &Snapshot, previous: &Snapshot) -> DiffResult {
    DiffEngine::new().diff(current, previous)
}
