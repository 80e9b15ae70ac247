// src/errors.rs
use thiserror::Error;

/// Feed document is not well-formed XML.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("xml syntax error at byte {position}: {message}")]
    Syntax { position: u64, message: String },
    #[error("element <{0}> is never closed")]
    Unclosed(String),
    #[error("more than one root element")]
    MultipleRoots,
    #[error("document has no root element")]
    Empty,
}

/// Failure reported by a document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connection loss, timeout: expected to go away on retry.
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("duplicate value for unique index on '{field}': {value}")]
    DuplicateKey { field: String, value: String },
    #[error("store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Run-level failure surfaced to whoever triggered the ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: StoreError },
    #[error("document could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
}
