// src/extract/timestamp.rs
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

pub const DISPLAY_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
pub const CLOCK_FORMAT: &str = "%H:%M:%S";

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"];
const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// ISO-8601 → offset-aware timestamp. A trailing `Z` means `+00:00`; values
/// without an offset are read as `+00:00` wall-clock. Garbage → `None`.
pub fn parse_iso8601(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let owned;
    let s = match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        Some(head) => {
            owned = format!("{head}+00:00");
            owned.as_str()
        }
        None => s,
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

/// `dd/mm/YYYY HH:MM:SS` in the timestamp's own offset.
pub fn display(dt: &DateTime<FixedOffset>) -> String {
    dt.format(DISPLAY_FORMAT).to_string()
}

pub fn clock(dt: &DateTime<FixedOffset>) -> String {
    dt.format(CLOCK_FORMAT).to_string()
}

/// Display string for raw text, empty when absent or unparseable.
pub fn display_raw(raw: Option<&str>) -> String {
    raw.and_then(parse_iso8601)
        .map(|dt| display(&dt))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zulu_suffix_is_utc() {
        let dt = parse_iso8601("2023-01-01T10:00:00Z").unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 0);
        assert_eq!(display(&dt), "01/01/2023 10:00:00");
        assert_eq!(clock(&dt), "10:00:00");
    }

    #[test]
    fn offset_is_kept_for_display() {
        let dt = parse_iso8601("2024-03-05T08:15:30.250+01:00").unwrap();
        assert_eq!(display(&dt), "05/03/2024 08:15:30");
        assert_eq!(dt.offset().local_minus_utc(), 3600);
    }

    #[test]
    fn naive_and_date_only_are_accepted() {
        assert!(parse_iso8601("2024-03-05T08:15:30").is_some());
        assert_eq!(
            display(&parse_iso8601("2024-03-05").unwrap()),
            "05/03/2024 00:00:00"
        );
    }

    #[test]
    fn garbage_is_none_not_error() {
        assert!(parse_iso8601("").is_none());
        assert!(parse_iso8601("yesterday").is_none());
        assert_eq!(display_raw(Some("31/31/2023")), "");
        assert_eq!(display_raw(None), "");
    }
}
