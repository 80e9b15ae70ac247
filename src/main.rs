//! feed-ingest: run DATEX II feed ingestion once.
//!
//! Reads every `*.xml` under the feed directory, extracts and normalizes the
//! situation records, and upserts them by identity into the JSON document
//! store. Exits non-zero when the run fails.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use traffic_feed_ingest::ingest::{self, CancelFlag, DirectorySource, FeedSource, IngestConfig};
use traffic_feed_ingest::metrics::Metrics;
use traffic_feed_ingest::store::{DocumentStore, JsonFileStore, MemoryStore};

#[derive(Parser, Debug)]
#[command(name = "feed-ingest")]
#[command(about = "Ingest DATEX II traffic feed files into a document collection")]
#[command(version)]
struct Cli {
    /// Config file (TOML or JSON); overrides $FEED_INGEST_CONFIG and config/ discovery
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the feed XML files
    #[arg(long)]
    feed_dir: Option<PathBuf>,

    /// Root directory of the JSON document store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Ingest into an in-memory collection; nothing is persisted
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "FEED_INGEST_LOG_JSON")]
    log_json: bool,

    /// Write the Prometheus exposition text here after the run
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("traffic_feed_ingest=info,feed_ingest=info,warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn load_config(cli: &Cli) -> Result<IngestConfig> {
    let mut cfg = match &cli.config {
        Some(path) => IngestConfig::load_from(path)?.with_env_overrides()?,
        None => IngestConfig::load_default()?,
    };
    if let Some(dir) = &cli.feed_dir {
        cfg.feed_dir = dir.clone();
    }
    if let Some(dir) = &cli.data_dir {
        cfg.data_dir = dir.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let metrics = match cli.metrics_out {
        Some(_) => Some(Metrics::init()?),
        None => None,
    };

    let cfg = load_config(&cli).context("loading ingest config")?;
    cfg.log_config();

    let store: Arc<dyn DocumentStore> = if cli.dry_run {
        Arc::new(MemoryStore::new(format!("{}.{}", cfg.database, cfg.collection)))
    } else {
        Arc::new(
            JsonFileStore::open(&cfg.data_dir, &cfg.database, &cfg.collection)
                .context("opening document store")?,
        )
    };

    let sources: Vec<Box<dyn FeedSource>> = vec![Box::new(DirectorySource::new(&cfg.feed_dir))];
    let summary = ingest::run_once(&sources, store, &cfg, &CancelFlag::new())
        .await
        .context("ingest run failed")?;

    if let (Some(metrics), Some(path)) = (&metrics, &cli.metrics_out) {
        metrics.write_to(path)?;
    }

    println!(
        "documents={} records={} inserted={} updated={} unchanged={} total={}",
        summary.documents,
        summary.extract.records,
        summary.report.inserted,
        summary.report.updated,
        summary.report.unchanged,
        summary.report.final_count
    );
    Ok(())
}
