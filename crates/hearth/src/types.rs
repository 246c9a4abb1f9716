use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primary key field present on every record.
pub const ID_FIELD: &str = "id";

/// Last-modified field; the only conflict signal between writers.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Sentinel date used when a record carries no usable timestamp.
pub const EPOCH_ISO: &str = "1970-01-01T00:00:00.000Z";

// ============================================================================
// Record helpers
// ============================================================================

/// The record's id, if it is a non-empty string.
pub fn record_id(record: &Value) -> Option<&str> {
    record
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// The record's `updatedAt`, parsed. `None` when missing or unparseable.
pub fn updated_at(record: &Value) -> Option<DateTime<Utc>> {
    record.get(UPDATED_AT_FIELD).and_then(parse_timestamp)
}

/// Parse an RFC 3339 string (offset optional, `Z` assumed) or a number of
/// epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_iso(s),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

pub(crate) fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Offset-less timestamps are read as UTC.
    DateTime::parse_from_rfc3339(&format!("{s}Z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Order two records by `updatedAt`. Records without a usable timestamp sort
/// before every record that has one.
pub fn compare_updated_at(a: &Value, b: &Value) -> Ordering {
    updated_at(a).cmp(&updated_at(b))
}

/// Current time as an ISO 8601 string with millisecond precision and `Z`.
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

pub fn to_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================================================
// Raw storage rows
// ============================================================================

/// A row as persisted by a storage engine, read without schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub collection: String,
    pub data: Value,
    pub deleted: bool,
}

/// Error associated with a specific record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub id: String,
    pub collection: String,
    pub error: String,
}

/// Result of a raw collection scan. Rows that could not be decoded are
/// reported in `errors` instead of failing the scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawScan {
    pub records: Vec<RawRecord>,
    pub errors: Vec<RecordError>,
}

impl RawScan {
    /// Live (non-tombstoned) rows only.
    pub fn live(&self) -> impl Iterator<Item = &RawRecord> {
        self.records.iter().filter(|r| !r.deleted)
    }
}

/// Result of a multi-record write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    /// Ids that were written.
    pub written: Vec<String>,
    pub errors: Vec<RecordError>,
}

// ============================================================================
// Generations
// ============================================================================

/// Metadata describing one persisted store generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInfo {
    pub name: String,
    /// Collection name → schema version the collection was created with.
    pub collections: BTreeMap<String, u32>,
    pub created_at: String,
}

impl GenerationInfo {
    /// Migration epoch encoded in the generation name, if it follows the
    /// `hearth-gen-{epoch}` convention.
    pub fn epoch(&self) -> Option<u64> {
        parse_generation_epoch(&self.name)
    }

    /// Sort key placing older generations first: epoch, then creation time,
    /// then name. Generations predating the naming scheme sort first.
    pub fn version_order(&self) -> (u64, &str, &str) {
        (self.epoch().unwrap_or(0), &self.created_at, &self.name)
    }
}

pub const GENERATION_PREFIX: &str = "hearth-gen-";

/// Deterministic generation name for a migration epoch.
pub fn generation_name(epoch: u64) -> String {
    format!("{GENERATION_PREFIX}{epoch}")
}

pub fn parse_generation_epoch(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}
