// src/model.rs
//! Value types handed down the pipeline: raw document → extracted record →
//! normalized event → ingestion document. Each stage takes ownership of the
//! previous stage's output; nothing here is shared or mutated across stages.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityKey;
use crate::store::Document;
use crate::taxonomy::Category;

/// Opaque bytes of one feed file plus the name it was loaded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFeedDocument {
    pub source_file: String,
    pub content: Vec<u8>,
}

impl RawFeedDocument {
    pub fn new(source_file: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            source_file: source_file.into(),
            content: content.into(),
        }
    }
}

/// Header of the `<situation>` a record belongs to. Only scopes its records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Situation {
    pub id: String,
    pub version: String,
    pub severity: Option<String>,
    pub version_time: Option<String>,
}

/// One `<situationRecord>` as found in the feed. Values are kept as the raw
/// text the document carried; coercion happens in `normalize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SituationRecord {
    pub situation: Situation,
    pub record_type: String,
    pub record_id: String,
    pub record_version: String,
    pub queue_length: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub road_number: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    /// `%d/%m/%Y %H:%M:%S`, empty when the start time is absent or unparseable.
    pub start_display: String,
    pub end_display: String,
    pub is_ended: bool,
    pub sub_type: Option<String>,
    pub status: String,
    pub direction: Option<String>,
    pub location: Option<String>,
    pub source_file: String,
}

/// Why a normalized value differs from what the feed carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFlag {
    LatitudeOutOfRange,
    LongitudeOutOfRange,
    LatitudeUnparseable,
    LongitudeUnparseable,
    QueueLengthUnparseable,
    EndTimeBackfilled,
    RoadNumberDefaulted,
    UnmappedRecordType,
}

/// A record after coercion, clamping, taxonomy mapping and backfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub situation_id: String,
    pub situation_version: String,
    pub severity: Option<String>,
    pub version_time: Option<DateTime<FixedOffset>>,
    /// Raw `xsi:type` value, kept for traceability next to `category`.
    pub record_type: String,
    pub category: Category,
    pub record_id: String,
    pub record_version: String,
    pub queue_length: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub road_number: String,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub start_display: String,
    pub end_display: String,
    pub start_clock: String,
    pub end_clock: String,
    pub is_ended: bool,
    pub sub_type: Option<String>,
    pub status: String,
    pub direction: Option<String>,
    pub location: Option<String>,
    pub source_file: String,
    #[serde(default)]
    pub flags: Vec<ValidationFlag>,
}

impl NormalizedEvent {
    pub fn has_flag(&self, flag: ValidationFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Record a flag once; insertion order is kept.
    pub(crate) fn flag(&mut self, flag: ValidationFlag) {
        if !self.has_flag(flag) {
            self.flags.push(flag);
        }
    }
}

/// What actually gets written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionDocument {
    #[serde(flatten)]
    pub event: NormalizedEvent,
    pub identity: IdentityKey,
    pub import_date: String,
    pub updated_at: String,
}

impl IngestionDocument {
    pub fn new(event: NormalizedEvent, identity: IdentityKey, now: DateTime<Utc>) -> Self {
        Self {
            event,
            identity,
            import_date: now.format("%Y-%m-%d").to_string(),
            updated_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Flatten into the field map used as the `$set` payload of an upsert.
    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(serde::ser::Error::custom(
                "ingestion document did not serialize to an object",
            )),
        }
    }
}
