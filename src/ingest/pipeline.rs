// src/ingest/pipeline.rs
//! Batched upsert-by-identity into one collection, wrapped in the retry
//! state machine.

use metrics::{counter, gauge, histogram};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::retry::{AttemptOutcome, RetryPolicy, RetryState};
use crate::errors::{IngestError, StoreError};
use crate::identity::{IdentityKey, IDENTITY_FIELD};
use crate::model::IngestionDocument;
use crate::store::{Document, DocumentStore, Filter, IndexSpec, UpsertOutcome};

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Fields that get an ascending index once a batch carries them.
pub const QUERYABLE_FIELDS: [&str; 4] = ["start_time", "location", "category", "import_date"];

/// Shared stop request, observed between batches and between documents.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts are per distinct identity: an identity that was inserted counts
/// as inserted even if a later document in the run updated it again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub attempts: u32,
    pub batches: usize,
    pub initial_count: u64,
    pub final_count: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Outcome {
    Unchanged,
    Updated,
    Inserted,
}

impl From<UpsertOutcome> for Outcome {
    fn from(o: UpsertOutcome) -> Self {
        if o.inserted {
            Outcome::Inserted
        } else if o.modified_count > 0 {
            Outcome::Updated
        } else {
            Outcome::Unchanged
        }
    }
}

/// What survives between attempts, so a retry resumes where it stopped.
#[derive(Default)]
struct Progress {
    committed: usize,
    batches: usize,
    initial_count: Option<u64>,
    final_count: u64,
    indexed: BTreeSet<String>,
    outcomes: BTreeMap<IdentityKey, Outcome>,
}

impl Progress {
    fn record(&mut self, key: &IdentityKey, outcome: Outcome) {
        let slot = self.outcomes.entry(key.clone()).or_insert(outcome);
        *slot = (*slot).max(outcome);
    }
}

enum Flow {
    Completed,
    Cancelled,
}

pub struct IngestionPipeline {
    store: Arc<dyn DocumentStore>,
    batch_size: usize,
    policy: RetryPolicy,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Upsert every document by identity. Transient store failures are
    /// retried per the policy; anything else, or running out of attempts,
    /// is returned as an error.
    pub async fn ingest(
        &self,
        docs: &[IngestionDocument],
        cancel: &CancelFlag,
    ) -> Result<IngestReport, IngestError> {
        crate::metrics::describe_once();

        let encoded = docs
            .iter()
            .map(|d| Ok((d.identity.clone(), d.to_document()?)))
            .collect::<Result<Vec<(IdentityKey, Document)>, serde_json::Error>>()?;

        let mut progress = Progress::default();
        let mut state = self.policy.first();
        let mut attempts = 0;
        let mut cancelled = false;
        let mut last_error: Option<StoreError> = None;

        while let RetryState::Attempt(n) = state {
            attempts = n;
            let outcome = match self.attempt(&encoded, &mut progress, cancel).await {
                Ok(flow) => {
                    cancelled = matches!(flow, Flow::Cancelled);
                    AttemptOutcome::Success
                }
                Err(e) => {
                    let kind = if e.is_transient() {
                        AttemptOutcome::Transient
                    } else {
                        AttemptOutcome::Permanent
                    };
                    last_error = Some(e);
                    kind
                }
            };

            let (next, delay) = self.policy.transition(state, outcome);
            if let Some(delay) = delay {
                counter!("store_retries_total").increment(1);
                tracing::warn!(
                    store = self.store.name(),
                    attempt = n,
                    delay_ms = delay.as_millis() as u64,
                    committed = progress.committed,
                    error = ?last_error,
                    "transient store failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            state = next;
        }

        if state == RetryState::Fatal {
            let err = last_error
                .unwrap_or_else(|| StoreError::Fatal("attempt failed without an error".into()));
            tracing::error!(store = self.store.name(), attempts, error = %err, "ingestion failed");
            return Err(if err.is_transient() {
                IngestError::RetriesExhausted {
                    attempts,
                    last: err,
                }
            } else {
                IngestError::Store(err)
            });
        }

        let mut report = IngestReport {
            documents: docs.len(),
            attempts,
            batches: progress.batches,
            initial_count: progress.initial_count.unwrap_or_default(),
            final_count: progress.final_count,
            cancelled,
            ..IngestReport::default()
        };
        for outcome in progress.outcomes.values() {
            match outcome {
                Outcome::Inserted => report.inserted += 1,
                Outcome::Updated => report.updated += 1,
                Outcome::Unchanged => report.unchanged += 1,
            }
        }

        let grown = report.final_count.saturating_sub(report.initial_count);
        if report.final_count < report.initial_count || grown != report.inserted as u64 {
            tracing::warn!(
                store = self.store.name(),
                initial_count = report.initial_count,
                final_count = report.final_count,
                inserted = report.inserted,
                "collection count does not match net-new identities (concurrent writer?)"
            );
        }
        gauge!("ingest_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::info!(
            store = self.store.name(),
            documents = report.documents,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            batches = report.batches,
            attempts = report.attempts,
            cancelled = report.cancelled,
            "ingestion finished"
        );
        Ok(report)
    }

    async fn attempt(
        &self,
        encoded: &[(IdentityKey, Document)],
        progress: &mut Progress,
        cancel: &CancelFlag,
    ) -> Result<Flow, StoreError> {
        self.ensure_index(IndexSpec::unique(IDENTITY_FIELD), progress)
            .await?;
        if progress.initial_count.is_none() {
            progress.initial_count = Some(self.store.count_documents(&Filter::all()).await?);
        }

        while progress.committed < encoded.len() {
            if cancel.is_cancelled() {
                tracing::info!(committed = progress.committed, "ingestion cancelled at batch boundary");
                return self.finish(progress, Flow::Cancelled).await;
            }
            let batch = progress.committed / self.batch_size;
            let end = ((batch + 1) * self.batch_size).min(encoded.len());
            let started = Instant::now();

            for field in QUERYABLE_FIELDS {
                let present = encoded[progress.committed..end]
                    .iter()
                    .any(|(_, d)| d.get(field).is_some_and(|v| !v.is_null()));
                if present {
                    self.ensure_index(IndexSpec::ascending(field), progress)
                        .await?;
                }
            }

            let (mut inserted, mut updated) = (0u64, 0u64);
            while progress.committed < end {
                if cancel.is_cancelled() {
                    tracing::info!(committed = progress.committed, "ingestion cancelled mid-batch");
                    return self.finish(progress, Flow::Cancelled).await;
                }
                let (key, doc) = &encoded[progress.committed];
                let filter = Filter::eq(IDENTITY_FIELD, key.as_str());
                let outcome = Outcome::from(self.store.upsert_by_filter(&filter, doc).await?);
                match outcome {
                    Outcome::Inserted => inserted += 1,
                    Outcome::Updated => updated += 1,
                    Outcome::Unchanged => {}
                }
                progress.record(key, outcome);
                progress.committed += 1;
            }

            progress.batches += 1;
            counter!("store_upserts_inserted_total").increment(inserted);
            counter!("store_upserts_updated_total").increment(updated);
            histogram!("ingest_batch_ms").record(started.elapsed().as_secs_f64() * 1000.0);
            tracing::debug!(batch, size = end - batch * self.batch_size, inserted, updated, "batch upserted");
        }

        self.finish(progress, Flow::Completed).await
    }

    async fn finish(&self, progress: &mut Progress, flow: Flow) -> Result<Flow, StoreError> {
        progress.final_count = self.store.count_documents(&Filter::all()).await?;
        Ok(flow)
    }

    async fn ensure_index(&self, index: IndexSpec, progress: &mut Progress) -> Result<(), StoreError> {
        let name = index.name();
        if progress.indexed.contains(&name) {
            return Ok(());
        }
        if self.store.create_index(&index).await? {
            tracing::info!(store = self.store.name(), index = %name, unique = index.unique, "index created");
        }
        progress.indexed.insert(name);
        Ok(())
    }
}
