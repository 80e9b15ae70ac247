// src/metrics.rs
use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::path::Path;

/// One-time metrics registration (so series show up in the exposition).
pub(crate) fn describe_once() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_source_errors_total", "Feed source fetch errors.");
        describe_counter!("feed_documents_total", "Feed documents handed to extraction.");
        describe_counter!(
            "feed_records_extracted_total",
            "Situation records produced by extraction."
        );
        describe_counter!(
            "feed_structural_miss_total",
            "Documents or situations skipped because an expected element was absent."
        );
        describe_counter!("feed_parse_errors_total", "Feed documents that were not well-formed XML.");
        describe_counter!(
            "normalize_dropped_total",
            "Records dropped for lack of a parseable start time."
        );
        describe_counter!(
            "validation_flags_total",
            "Validation flags raised while normalizing, by flag."
        );
        describe_counter!("store_upserts_inserted_total", "Upserts that inserted a new document.");
        describe_counter!("store_upserts_updated_total", "Upserts that modified an existing document.");
        describe_counter!("store_retries_total", "Batch attempts retried after a transient store failure.");
        describe_histogram!("ingest_batch_ms", "Time to upsert one batch, in milliseconds.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when the ingestion pipeline last finished.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder for this process.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_once();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Dump the current exposition to `path` (textfile-collector style).
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render())
            .with_context(|| format!("writing metrics to {}", path.display()))
    }
}
