// src/services/normalizer.rs

//! Raw search result to canonical listing mapping.
//!
//! Field names map 1:1 (`Id` → `source_id`, `Manufacturer` → `manufacturer`, ...).
//! Absent or null fields take the canonical default. A field holding a value of
//! the wrong shape rejects the whole record with a per-field issue list; an
//! unparsable `ModifiedDate` only nulls the timestamp.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde_json::Value;

use crate::error::{FieldIssue, NormalizationError};
use crate::models::{CanonicalRecord, RawRecord};

/// `YYYY-MM-DD HH:MM:SS`, optional fraction, optional `+HH:MM` / `-HHMM` / `-HH` offset.
static MODIFIED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})(?:\.\d+)?\s*(?:[+-]\d{2}(?::?\d{2})?)?\s*$",
    )
    .expect("static regex")
});

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse the upstream modification timestamp, discarding offset and fraction.
pub fn parse_modified_date(raw: &str) -> Option<NaiveDateTime> {
    let core = MODIFIED_DATE.captures(raw)?.get(1)?.as_str();
    NaiveDateTime::parse_from_str(core, DATE_FORMAT).ok()
}

/// Maps raw upstream records into [`CanonicalRecord`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordNormalizer;

impl RecordNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one raw record. Never fails for absent fields.
    pub fn normalize(&self, raw: &RawRecord) -> Result<CanonicalRecord, NormalizationError> {
        let mut fields = FieldReader {
            raw,
            issues: Vec::new(),
        };

        let source_id = fields.id();
        let mut record = CanonicalRecord::with_id(source_id.clone().unwrap_or_default());

        record.manufacturer = fields.string("Manufacturer");
        record.model = fields.string("Model");
        record.badge = fields.string("Badge");
        record.badge_detail = fields.string("BadgeDetail");
        record.transmission = fields.string("Transmission");
        record.fuel_type = fields.string("FuelType");
        record.year = fields.number("Year");
        record.form_year = fields.string("FormYear");
        record.mileage = fields.number("Mileage");
        record.price = fields.number("Price");
        record.separation = fields.string_list("Separation");
        record.trust = fields.string_list("Trust");
        record.service_mark = fields.string_list("ServiceMark");
        record.condition = fields.string_list("Condition");
        record.photo = fields.string("Photo");
        record.photos = fields.opaque_list("Photos");
        record.service_copy_car = fields.string("ServiceCopyCar");
        record.sales_status = fields.string("SalesStatus");
        record.sell_type = fields.string("SellType");
        record.buy_type = fields.string_list("BuyType");
        record.powerpack = fields.string("Powerpack");
        record.ad_words = fields.string("AdWords");
        record.hotmark = fields.string("Hotmark");
        record.office_city_state = fields.string("OfficeCityState");
        record.office_name = fields.string("OfficeName");
        record.dealer_name = fields.string("DealerName");
        record.modified_date = fields.modified_date(source_id.as_deref());

        if fields.issues.is_empty() {
            Ok(record)
        } else {
            Err(NormalizationError {
                source_id,
                issues: fields.issues,
            })
        }
    }
}

struct FieldReader<'a> {
    raw: &'a RawRecord,
    issues: Vec<FieldIssue>,
}

impl FieldReader<'_> {
    fn get(&self, field: &str) -> Option<&Value> {
        self.raw.get(field).filter(|v| !v.is_null())
    }

    fn issue(&mut self, field: &'static str, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            field,
            message: message.into(),
        });
    }

    fn id(&mut self) -> Option<String> {
        let id = match self.get("Id") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                let kind = kind_of(other);
                self.issue("Id", format!("expected string or number, got {kind}"));
                return None;
            }
            None => String::new(),
        };
        if id.is_empty() {
            self.issue("Id", "missing listing id");
            return None;
        }
        Some(id)
    }

    fn string(&mut self, field: &'static str) -> String {
        match self.get(field) {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(other) => {
                let kind = kind_of(other);
                self.issue(field, format!("expected string, got {kind}"));
                String::new()
            }
        }
    }

    fn number(&mut self, field: &'static str) -> Option<f64> {
        match self.get(field) {
            None => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    self.issue(field, format!("expected number, got {s:?}"));
                    None
                }
            },
            Some(other) => {
                let kind = kind_of(other);
                self.issue(field, format!("expected number, got {kind}"));
                None
            }
        }
    }

    fn string_list(&mut self, field: &'static str) -> Vec<String> {
        let items = match self.get(field) {
            None => return Vec::new(),
            Some(Value::Array(items)) => items,
            Some(other) => {
                let kind = kind_of(other);
                self.issue(field, format!("expected list of strings, got {kind}"));
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(s) => out.push(s.clone()),
                Value::Number(n) => out.push(n.to_string()),
                other => {
                    let kind = kind_of(other);
                    self.issue(field, format!("expected list of strings, found {kind}"));
                    return Vec::new();
                }
            }
        }
        out
    }

    fn opaque_list(&mut self, field: &'static str) -> Vec<Value> {
        match self.get(field) {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                let kind = kind_of(other);
                self.issue(field, format!("expected list, got {kind}"));
                Vec::new()
            }
        }
    }

    fn modified_date(&self, source_id: Option<&str>) -> Option<NaiveDateTime> {
        let raw = match self.get("ModifiedDate") {
            None => return None,
            Some(Value::String(s)) if s.trim().is_empty() => return None,
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                log::warn!(
                    "Ignoring non-string ModifiedDate {} for listing {}",
                    other,
                    source_id.unwrap_or("<no id>")
                );
                return None;
            }
        };

        let parsed = parse_modified_date(raw);
        if parsed.is_none() {
            log::warn!(
                "Failed to parse date '{}' for listing {}",
                raw,
                source_id.unwrap_or("<no id>")
            );
        }
        parsed
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
