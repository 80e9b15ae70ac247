// src/normalize.rs
//! Pure, total record → event normalization.
//!
//! `normalize` lifts a raw `SituationRecord` into a `NormalizedEvent`
//! (coercion + the mandatory start time) and then applies `normalize_event`,
//! the projection that clamps coordinates, maps the taxonomy, defaults the
//! road number and backfills end-of-period fields. `normalize_event` is
//! idempotent, and since `normalize` ends with it, re-normalizing its output
//! changes nothing.

use metrics::counter;
use std::collections::BTreeSet;

use crate::extract::timestamp::{clock, display, parse_iso8601};
use crate::model::{NormalizedEvent, SituationRecord, ValidationFlag};
use crate::taxonomy;

/// Replaces out-of-range coordinates.
pub const COORDINATE_SENTINEL: f64 = 0.0;
pub const UNKNOWN_ROAD: &str = "Unknown";

const LATITUDE_RANGE: std::ops::RangeInclusive<f64> = -90.0..=90.0;
const LONGITUDE_RANGE: std::ops::RangeInclusive<f64> = -180.0..=180.0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub kept: usize,
    pub dropped_missing_start: usize,
    pub clamped: usize,
    pub unmapped_types: BTreeSet<String>,
}

/// Numeric text → finite f64. Anything else is `None` plus `flag` when text
/// was present.
fn coerce_number(raw: Option<&str>, flag: ValidationFlag, flags: &mut Vec<ValidationFlag>) -> Option<f64> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => {
            flags.push(flag);
            None
        }
    }
}

/// `None` means the record is dropped: no parseable start time.
pub fn normalize(record: SituationRecord) -> Option<NormalizedEvent> {
    let start_time = record.start_time.as_deref().and_then(parse_iso8601)?;
    let end_time = record.end_time.as_deref().and_then(parse_iso8601);

    let mut flags = Vec::new();
    let latitude = coerce_number(
        record.latitude.as_deref(),
        ValidationFlag::LatitudeUnparseable,
        &mut flags,
    );
    let longitude = coerce_number(
        record.longitude.as_deref(),
        ValidationFlag::LongitudeUnparseable,
        &mut flags,
    );
    let queue_length = coerce_number(
        record.queue_length.as_deref(),
        ValidationFlag::QueueLengthUnparseable,
        &mut flags,
    );
    if end_time.is_none() {
        flags.push(ValidationFlag::EndTimeBackfilled);
    }

    let situation = record.situation;
    let event = NormalizedEvent {
        situation_id: situation.id,
        situation_version: situation.version,
        severity: situation.severity,
        version_time: situation.version_time.as_deref().and_then(parse_iso8601),
        category: taxonomy::classify(&record.record_type),
        record_type: record.record_type,
        record_id: record.record_id,
        record_version: record.record_version,
        queue_length,
        latitude,
        longitude,
        road_number: record.road_number.unwrap_or_default(),
        start_time,
        end_time: end_time.unwrap_or(start_time),
        start_display: String::new(),
        end_display: String::new(),
        start_clock: String::new(),
        end_clock: String::new(),
        is_ended: record.is_ended,
        sub_type: record.sub_type,
        status: record.status,
        direction: record.direction,
        location: record.location,
        source_file: record.source_file,
        flags,
    };
    Some(normalize_event(event))
}

fn clamp(value: Option<f64>, range: &std::ops::RangeInclusive<f64>) -> (Option<f64>, bool) {
    match value {
        Some(v) if !range.contains(&v) => (Some(COORDINATE_SENTINEL), true),
        other => (other, false),
    }
}

/// Projection onto valid events. Never fails; applying it twice is the same
/// as applying it once.
pub fn normalize_event(mut ev: NormalizedEvent) -> NormalizedEvent {
    let (lat, lat_clamped) = clamp(ev.latitude, &LATITUDE_RANGE);
    ev.latitude = lat;
    if lat_clamped {
        ev.flag(ValidationFlag::LatitudeOutOfRange);
    }
    let (lon, lon_clamped) = clamp(ev.longitude, &LONGITUDE_RANGE);
    ev.longitude = lon;
    if lon_clamped {
        ev.flag(ValidationFlag::LongitudeOutOfRange);
    }

    ev.category = taxonomy::classify(&ev.record_type);
    if !taxonomy::is_mapped(&ev.record_type) {
        ev.flag(ValidationFlag::UnmappedRecordType);
    }

    if ev.road_number.trim().is_empty() {
        ev.road_number = UNKNOWN_ROAD.to_string();
        ev.flag(ValidationFlag::RoadNumberDefaulted);
    }

    // end_time is already backfilled; the display and clock fields follow it.
    ev.start_display = display(&ev.start_time);
    ev.start_clock = clock(&ev.start_time);
    ev.end_display = display(&ev.end_time);
    ev.end_clock = clock(&ev.end_time);

    let mut seen = Vec::with_capacity(ev.flags.len());
    ev.flags.retain(|f| {
        if seen.contains(f) {
            false
        } else {
            seen.push(*f);
            true
        }
    });
    ev
}

/// Normalize a batch, counting what was dropped or altered.
pub fn normalize_all<I>(records: I) -> (Vec<NormalizedEvent>, NormalizeStats)
where
    I: IntoIterator<Item = SituationRecord>,
{
    let mut stats = NormalizeStats::default();
    let mut out = Vec::new();

    for record in records {
        let raw_type = record.record_type.clone();
        let Some(ev) = normalize(record) else {
            stats.dropped_missing_start += 1;
            counter!("normalize_dropped_total").increment(1);
            continue;
        };
        if ev.has_flag(ValidationFlag::LatitudeOutOfRange)
            || ev.has_flag(ValidationFlag::LongitudeOutOfRange)
        {
            stats.clamped += 1;
        }
        if ev.has_flag(ValidationFlag::UnmappedRecordType) {
            stats.unmapped_types.insert(raw_type);
        }
        for flag in &ev.flags {
            counter!("validation_flags_total", "flag" => flag_label(*flag)).increment(1);
        }
        out.push(ev);
    }
    stats.kept = out.len();

    if stats.dropped_missing_start > 0 {
        tracing::info!(
            dropped = stats.dropped_missing_start,
            "rows without a start time dropped"
        );
    }
    if !stats.unmapped_types.is_empty() {
        tracing::warn!(types = ?stats.unmapped_types, "record types mapped to Other");
    }
    (out, stats)
}

fn flag_label(flag: ValidationFlag) -> &'static str {
    match flag {
        ValidationFlag::LatitudeOutOfRange => "latitude_out_of_range",
        ValidationFlag::LongitudeOutOfRange => "longitude_out_of_range",
        ValidationFlag::LatitudeUnparseable => "latitude_unparseable",
        ValidationFlag::LongitudeUnparseable => "longitude_unparseable",
        ValidationFlag::QueueLengthUnparseable => "queue_length_unparseable",
        ValidationFlag::EndTimeBackfilled => "end_time_backfilled",
        ValidationFlag::RoadNumberDefaulted => "road_number_defaulted",
        ValidationFlag::UnmappedRecordType => "unmapped_record_type",
    }
}
