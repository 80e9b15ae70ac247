// src/store/memory.rs
use async_trait::async_trait;
use std::sync::Mutex;

use super::collection::Collection;
use super::{Document, DocumentStore, Filter, IndexSpec, StoreError, UpsertOutcome};

/// In-process collection. Every operation runs under one lock, so the
/// filter-then-write of an upsert is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    inner: Mutex<Collection>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Collection::default()),
        }
    }

    /// Snapshot of the stored documents, in insertion order.
    pub fn documents(&self) -> Vec<Document> {
        self.inner
            .lock()
            .map(|c| c.docs().to_vec())
            .unwrap_or_default()
    }

    pub fn indexes(&self) -> Vec<IndexSpec> {
        self.inner
            .lock()
            .map(|c| c.indexes().to_vec())
            .unwrap_or_default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Collection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| StoreError::Fatal("memory store lock poisoned".into()))?;
        f(&mut guard)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert_by_filter(
        &self,
        filter: &Filter,
        document: &Document,
    ) -> Result<UpsertOutcome, StoreError> {
        self.with(|c| c.upsert(filter, document))
    }

    async fn count_documents(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.with(|c| Ok(c.count(filter)))
    }

    async fn create_index(&self, index: &IndexSpec) -> Result<bool, StoreError> {
        self.with(|c| c.create_index(index))
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.with(|c| c.delete(filter))
    }

    async fn insert_many(&self, documents: Vec<Document>) -> Result<u64, StoreError> {
        self.with(|c| c.insert_many(documents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn concurrent_upserts_of_one_key_insert_once() {
        let store = Arc::new(MemoryStore::new("incidents"));
        store.create_index(&IndexSpec::unique("identity")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                let f = Filter::eq("identity", "S1:R1:1");
                s.upsert_by_filter(&f, &doc(json!({"identity": "S1:R1:1", "n": i})))
                    .await
                    .unwrap()
            }));
        }
        let mut inserted = 0;
        for h in handles {
            if h.await.unwrap().inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.count_documents(&Filter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn index_creation_is_idempotent() {
        let store = MemoryStore::new("incidents");
        assert!(store.create_index(&IndexSpec::ascending("start_time")).await.unwrap());
        assert!(!store.create_index(&IndexSpec::ascending("start_time")).await.unwrap());
        assert_eq!(store.indexes().len(), 1);
    }
}
