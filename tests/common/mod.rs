// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::time::Duration;

use traffic_feed_ingest::ingest::RetryPolicy;
use traffic_feed_ingest::model::RawFeedDocument;
use traffic_feed_ingest::store::{
    Document, DocumentStore, Filter, IndexSpec, MemoryStore, StoreError, UpsertOutcome,
};

pub fn fixture(name: &str) -> RawFeedDocument {
    let path = format!("tests/fixtures/{name}");
    let bytes = std::fs::read(&path).expect("fixture");
    RawFeedDocument::new(name, bytes)
}

/// Fast backoff so retry tests do not sleep for real.
pub fn quick_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        backoff_ceiling: Duration::from_millis(4),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail before touching the collection.
    Transient,
    /// Apply the write, then report a lost connection.
    TransientAfterWrite,
    Fatal,
}

#[derive(Default)]
struct Plan {
    upsert_calls: usize,
    faults: Vec<(usize, Fault)>,
    always: Option<Fault>,
}

/// `MemoryStore` wrapper that injects failures on chosen upsert calls
/// (1-based, counted across the whole run).
pub struct FaultyStore {
    pub inner: MemoryStore,
    plan: Mutex<Plan>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new("faulty.incidents"),
            plan: Mutex::new(Plan::default()),
        }
    }

    pub fn fail_upsert(self, call: usize, fault: Fault) -> Self {
        self.plan.lock().faults.push((call, fault));
        self
    }

    pub fn fail_every_upsert(self, fault: Fault) -> Self {
        self.plan.lock().always = Some(fault);
        self
    }

    pub fn upsert_calls(&self) -> usize {
        self.plan.lock().upsert_calls
    }

    pub fn identities(&self) -> BTreeSet<String> {
        self.inner
            .documents()
            .iter()
            .filter_map(|d| d.get("identity").and_then(|v| v.as_str()).map(str::to_string))
            .collect()
    }

    fn next_fault(&self) -> Option<Fault> {
        let mut plan = self.plan.lock();
        plan.upsert_calls += 1;
        let call = plan.upsert_calls;
        plan.always.or_else(|| {
            plan.faults
                .iter()
                .find(|(n, _)| *n == call)
                .map(|(_, f)| *f)
        })
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn upsert_by_filter(
        &self,
        filter: &Filter,
        document: &Document,
    ) -> Result<UpsertOutcome, StoreError> {
        match self.next_fault() {
            Some(Fault::Transient) => Err(StoreError::Transient("connection reset".into())),
            Some(Fault::Fatal) => Err(StoreError::Fatal("not authorized".into())),
            Some(Fault::TransientAfterWrite) => {
                self.inner.upsert_by_filter(filter, document).await?;
                Err(StoreError::Transient("connection reset after write".into()))
            }
            None => self.inner.upsert_by_filter(filter, document).await,
        }
    }

    async fn count_documents(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.count_documents(filter).await
    }

    async fn create_index(&self, index: &IndexSpec) -> Result<bool, StoreError> {
        self.inner.create_index(index).await
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.delete_many(filter).await
    }

    async fn insert_many(&self, documents: Vec<Document>) -> Result<u64, StoreError> {
        self.inner.insert_many(documents).await
    }
}
