// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod errors;
pub mod extract;
pub mod identity;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod store;
pub mod taxonomy;

// ---- Re-exports for stable public API ----
pub use crate::errors::{IngestError, ParseError, StoreError};
pub use crate::extract::{extract, extract_with, ExtractOptions, LocationScope, RecordStream};
pub use crate::identity::{resolve, IdentityKey};
pub use crate::ingest::{run_once, CancelFlag, IngestConfig, IngestReport, IngestionPipeline, RunSummary};
pub use crate::model::{IngestionDocument, NormalizedEvent, RawFeedDocument, SituationRecord};
pub use crate::normalize::{normalize, normalize_event};
pub use crate::taxonomy::Category;
