// src/identity.rs
//! Stable upsert identity for normalized events.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::model::NormalizedEvent;

/// Field the pipeline filters on and keeps a unique index for.
pub const IDENTITY_FIELD: &str = "identity";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_natural(&self) -> bool {
        !self.0.starts_with(DIGEST_PREFIX)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const DIGEST_PREFIX: &str = "digest:";

fn escape(part: &str) -> String {
    part.replace('\\', "\\\\").replace(':', "\\:")
}

/// `(SituationID, RecordID, RecordVersion)` when both ids are present,
/// otherwise a content digest. Both are pure functions of the event, so
/// re-running the same input always lands on the same keys.
pub fn resolve(ev: &NormalizedEvent) -> IdentityKey {
    if !ev.situation_id.trim().is_empty() && !ev.record_id.trim().is_empty() {
        return IdentityKey(format!(
            "{}:{}:{}",
            escape(ev.situation_id.trim()),
            escape(ev.record_id.trim()),
            escape(ev.record_version.trim())
        ));
    }
    IdentityKey(format!("{DIGEST_PREFIX}{}", content_digest(ev)))
}

fn content_digest(ev: &NormalizedEvent) -> String {
    let mut hasher = Sha256::new();
    let coord = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for part in [
        ev.category.as_str().to_string(),
        ev.record_type.clone(),
        ev.start_time.to_rfc3339(),
        coord(ev.latitude),
        coord(ev.longitude),
        ev.road_number.clone(),
        ev.sub_type.clone().unwrap_or_default(),
        ev.source_file.clone(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
