//! Catalog listing data structures.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One upstream search result, as received.
pub type RawRecord = serde_json::Map<String, Value>;

/// A listing in canonical form.
///
/// Produced by [`RecordNormalizer`](crate::services::RecordNormalizer) from a
/// [`RawRecord`]; identical raw input always yields an identical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Upstream listing id, the identity key
    pub source_id: String,

    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub badge: String,
    #[serde(default)]
    pub badge_detail: String,
    #[serde(default)]
    pub transmission: String,
    #[serde(default)]
    pub fuel_type: String,

    #[serde(default)]
    pub year: Option<f64>,
    #[serde(default)]
    pub form_year: String,
    #[serde(default)]
    pub mileage: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,

    #[serde(default)]
    pub separation: Vec<String>,
    #[serde(default)]
    pub trust: Vec<String>,
    #[serde(default)]
    pub service_mark: Vec<String>,
    #[serde(default)]
    pub condition: Vec<String>,

    #[serde(default)]
    pub photo: String,
    /// Photo descriptors, kept opaque
    #[serde(default)]
    pub photos: Vec<Value>,

    #[serde(default)]
    pub service_copy_car: String,
    #[serde(default)]
    pub sales_status: String,
    #[serde(default)]
    pub sell_type: String,
    #[serde(default)]
    pub buy_type: Vec<String>,
    #[serde(default)]
    pub powerpack: String,
    #[serde(default)]
    pub ad_words: String,
    #[serde(default)]
    pub hotmark: String,

    #[serde(default)]
    pub office_city_state: String,
    #[serde(default)]
    pub office_name: String,
    #[serde(default)]
    pub dealer_name: String,

    /// Upstream modification time with offset and fraction stripped
    #[serde(default)]
    pub modified_date: Option<NaiveDateTime>,

    /// Stamped by the catalog store when the listing is written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,

    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl CanonicalRecord {
    /// An otherwise empty record with the given id.
    pub fn with_id(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            manufacturer: String::new(),
            model: String::new(),
            badge: String::new(),
            badge_detail: String::new(),
            transmission: String::new(),
            fuel_type: String::new(),
            year: None,
            form_year: String::new(),
            mileage: None,
            price: None,
            separation: Vec::new(),
            trust: Vec::new(),
            service_mark: Vec::new(),
            condition: Vec::new(),
            photo: String::new(),
            photos: Vec::new(),
            service_copy_car: String::new(),
            sales_status: String::new(),
            sell_type: String::new(),
            buy_type: Vec::new(),
            powerpack: String::new(),
            ad_words: String::new(),
            hotmark: String::new(),
            office_city_state: String::new(),
            office_name: String::new(),
            dealer_name: String::new(),
            modified_date: None,
            last_seen_at: None,
            is_active: true,
        }
    }
}
