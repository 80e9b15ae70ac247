// src/ingest/mod.rs
pub mod config;
pub mod pipeline;
pub mod retry;
pub mod source;

pub use config::IngestConfig;
pub use pipeline::{CancelFlag, IngestReport, IngestionPipeline};
pub use retry::{AttemptOutcome, RetryPolicy, RetryState};
pub use source::{DirectorySource, FeedSource, FixtureSource};

use metrics::counter;
use std::sync::Arc;

use crate::errors::IngestError;
use crate::extract::{self, Diagnostic, ExtractStats};
use crate::identity;
use crate::model::IngestionDocument;
use crate::normalize::{normalize_all, NormalizeStats};
use crate::store::DocumentStore;

/// Everything one `run_once` saw, stage by stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub documents: usize,
    pub source_errors: usize,
    pub extract: ExtractStats,
    pub diagnostics: Vec<Diagnostic>,
    pub normalize: NormalizeStats,
    pub report: IngestReport,
}

/// Fetch → extract → normalize → identify → upsert, once.
///
/// Failing sources and bad documents are logged, counted and skipped; only
/// invalid configuration or a fatal store failure fails the run.
pub async fn run_once(
    sources: &[Box<dyn FeedSource>],
    store: Arc<dyn DocumentStore>,
    config: &IngestConfig,
    cancel: &CancelFlag,
) -> Result<RunSummary, IngestError> {
    crate::metrics::describe_once();
    config
        .validate()
        .map_err(|e| IngestError::Config(format!("{e:#}")))?;

    let mut summary = RunSummary::default();
    let mut raw = Vec::new();
    for s in sources {
        match s.fetch_documents().await {
            Ok(mut v) => raw.append(&mut v),
            Err(e) => {
                tracing::warn!(error = ?e, source = s.name(), "feed source error");
                counter!("ingest_source_errors_total").increment(1);
                summary.source_errors += 1;
            }
        }
    }
    summary.documents = raw.len();

    let options = config.extract_options();
    let mut records = Vec::new();
    for doc in raw {
        let mut stream = extract::extract_with(doc, options);
        records.extend(stream.by_ref());
        let stats = stream.stats();
        summary.extract.records += stats.records;
        summary.extract.structural_misses += stats.structural_misses;
        summary.extract.parse_errors += stats.parse_errors;
        summary.diagnostics.extend_from_slice(stream.diagnostics());
    }

    let (events, normalize_stats) = normalize_all(records);
    summary.normalize = normalize_stats;

    let now = chrono::Utc::now();
    let docs: Vec<IngestionDocument> = events
        .into_iter()
        .map(|ev| {
            let key = identity::resolve(&ev);
            IngestionDocument::new(ev, key, now)
        })
        .collect();

    let pipeline = IngestionPipeline::new(store)
        .with_batch_size(config.batch_size)
        .with_retry_policy(config.retry_policy());
    summary.report = pipeline.ingest(&docs, cancel).await?;

    tracing::info!(
        documents = summary.documents,
        records = summary.extract.records,
        structural_misses = summary.extract.structural_misses,
        parse_errors = summary.extract.parse_errors,
        dropped = summary.normalize.dropped_missing_start,
        inserted = summary.report.inserted,
        updated = summary.report.updated,
        "ingest run complete"
    );
    Ok(summary)
}
