// src/store/mod.rs
//! Document-store boundary: the operations the pipeline needs from a
//! collection, plus two implementations (in-process and JSON file).

pub mod json_file;
pub mod memory;

mod collection;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::errors::StoreError;
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

pub type Document = serde_json::Map<String, Value>;

/// Conjunction of field-equality conditions. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(Document);

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.0.iter().all(|(k, v)| doc.get(k) == Some(v))
    }

    pub fn conditions(&self) -> &Document {
        &self.0
    }
}

/// Ascending index over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            fields: vec![field.into()],
            unique: false,
        }
    }

    pub fn unique(field: impl Into<String>) -> Self {
        Self {
            fields: vec![field.into()],
            unique: true,
        }
    }

    /// `field_1[_field2_1...]`, the conventional ascending index name.
    pub fn name(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{f}_1"))
            .collect::<Vec<_>>()
            .join("_")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: bool,
    pub matched_count: u64,
    pub modified_count: u64,
}

/// One named collection of JSON documents.
///
/// `upsert_by_filter` must be an atomic conditional write scoped to the
/// filter: concurrent callers with the same filter can never both insert.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    /// `$set` every field of `document` on the first match, or insert
    /// `filter ∪ document` when nothing matches.
    async fn upsert_by_filter(
        &self,
        filter: &Filter,
        document: &Document,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn count_documents(&self, filter: &Filter) -> Result<u64, StoreError>;

    /// Idempotent: returns `false` when an identical index already exists.
    async fn create_index(&self, index: &IndexSpec) -> Result<bool, StoreError>;

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError>;

    async fn insert_many(&self, documents: Vec<Document>) -> Result<u64, StoreError>;
}
