// src/store/collection.rs
//! Synchronous collection semantics shared by the in-process stores.

use std::collections::HashMap;

use super::{Document, Filter, IndexSpec, StoreError, UpsertOutcome};

/// Encoded unique-index key → position in `docs`.
type KeyMap = HashMap<String, usize>;

#[derive(Debug, Clone, Default)]
pub(crate) struct Collection {
    docs: Vec<Document>,
    indexes: Vec<IndexSpec>,
    /// One key map per unique index, by index name.
    keys: HashMap<String, KeyMap>,
}

/// Unique-index key of a document; `None` when a field is absent (sparse).
/// Values are JSON-encoded, so the `,` separator cannot be ambiguous.
fn index_key(index: &IndexSpec, doc: &Document) -> Option<String> {
    let parts = index
        .fields
        .iter()
        .map(|f| doc.get(f).map(|v| v.to_string()))
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join(","))
}

fn duplicate(index: &IndexSpec, key: &str) -> StoreError {
    StoreError::DuplicateKey {
        field: index.fields.join(","),
        value: key.to_string(),
    }
}

fn key_map(index: &IndexSpec, docs: &[Document]) -> Result<KeyMap, StoreError> {
    let mut map = KeyMap::with_capacity(docs.len());
    for (pos, doc) in docs.iter().enumerate() {
        if let Some(key) = index_key(index, doc) {
            if map.insert(key.clone(), pos).is_some() {
                return Err(duplicate(index, &key));
            }
        }
    }
    Ok(map)
}

impl Collection {
    /// Rebuild from persisted documents and index definitions.
    pub fn from_parts(docs: Vec<Document>, indexes: Vec<IndexSpec>) -> Result<Self, StoreError> {
        let mut c = Self {
            docs,
            indexes,
            keys: HashMap::new(),
        };
        c.rebuild_keys()?;
        Ok(c)
    }

    pub fn docs(&self) -> &[Document] {
        &self.docs
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    fn rebuild_keys(&mut self) -> Result<(), StoreError> {
        let mut keys = HashMap::new();
        for index in self.indexes.iter().filter(|i| i.unique) {
            keys.insert(index.name(), key_map(index, &self.docs)?);
        }
        self.keys = keys;
        Ok(())
    }

    fn unique_indexes(&self) -> impl Iterator<Item = &IndexSpec> {
        self.indexes.iter().filter(|i| i.unique)
    }

    /// Reject `candidate` if it collides with any document other than `skip`.
    fn check_unique(&self, candidate: &Document, skip: Option<usize>) -> Result<(), StoreError> {
        for index in self.unique_indexes() {
            let Some(key) = index_key(index, candidate) else {
                continue;
            };
            let holder = self.keys.get(&index.name()).and_then(|m| m.get(&key));
            if matches!(holder, Some(pos) if Some(*pos) != skip) {
                return Err(duplicate(index, &key));
            }
        }
        Ok(())
    }

    /// Point `pos` at its current keys, dropping the ones `previous` held.
    fn reindex(&mut self, pos: usize, previous: Option<&Document>) {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let map = self.keys.entry(index.name()).or_default();
            if let Some(old) = previous.and_then(|d| index_key(index, d)) {
                if map.get(&old) == Some(&pos) {
                    map.remove(&old);
                }
            }
            if let Some(key) = index_key(index, &self.docs[pos]) {
                map.insert(key, pos);
            }
        }
    }

    /// First document matching `filter`. An equality filter on exactly the
    /// fields of a unique index is a key lookup; anything else scans.
    fn locate(&self, filter: &Filter) -> Option<usize> {
        let conditions = filter.conditions();
        let keyed = self.unique_indexes().find(|i| {
            i.fields.len() == conditions.len() && i.fields.iter().all(|f| conditions.contains_key(f))
        });
        if let Some(index) = keyed {
            let key = index_key(index, conditions)?;
            return self.keys.get(&index.name()).and_then(|m| m.get(&key)).copied();
        }
        self.docs.iter().position(|d| filter.matches(d))
    }

    pub fn upsert(&mut self, filter: &Filter, document: &Document) -> Result<UpsertOutcome, StoreError> {
        match self.locate(filter) {
            Some(pos) => {
                let mut updated = self.docs[pos].clone();
                let mut changed = false;
                for (k, v) in document {
                    if updated.get(k) != Some(v) {
                        updated.insert(k.clone(), v.clone());
                        changed = true;
                    }
                }
                if changed {
                    self.check_unique(&updated, Some(pos))?;
                    let previous = std::mem::replace(&mut self.docs[pos], updated);
                    self.reindex(pos, Some(&previous));
                }
                Ok(UpsertOutcome {
                    inserted: false,
                    matched_count: 1,
                    modified_count: u64::from(changed),
                })
            }
            None => {
                let mut fresh = filter.conditions().clone();
                for (k, v) in document {
                    fresh.insert(k.clone(), v.clone());
                }
                self.check_unique(&fresh, None)?;
                self.docs.push(fresh);
                self.reindex(self.docs.len() - 1, None);
                Ok(UpsertOutcome {
                    inserted: true,
                    matched_count: 0,
                    modified_count: 0,
                })
            }
        }
    }

    pub fn count(&self, filter: &Filter) -> u64 {
        if filter.conditions().is_empty() {
            return self.docs.len() as u64;
        }
        self.docs.iter().filter(|d| filter.matches(d)).count() as u64
    }

    pub fn create_index(&mut self, index: &IndexSpec) -> Result<bool, StoreError> {
        if let Some(existing) = self.indexes.iter().find(|i| i.fields == index.fields) {
            if existing.unique == index.unique {
                return Ok(false);
            }
            return Err(StoreError::Fatal(format!(
                "index {} already exists with different options",
                index.name()
            )));
        }
        if index.unique {
            let map = key_map(index, &self.docs)?;
            self.keys.insert(index.name(), map);
        }
        self.indexes.push(index.clone());
        Ok(true)
    }

    pub fn delete(&mut self, filter: &Filter) -> Result<u64, StoreError> {
        let before = self.docs.len();
        self.docs.retain(|d| !filter.matches(d));
        let removed = (before - self.docs.len()) as u64;
        if removed > 0 {
            self.rebuild_keys()?;
        }
        Ok(removed)
    }

    /// All-or-nothing: either every document goes in or none does.
    pub fn insert_many(&mut self, documents: Vec<Document>) -> Result<u64, StoreError> {
        let start = self.docs.len();
        for doc in documents {
            if let Err(e) = self.check_unique(&doc, None) {
                self.docs.truncate(start);
                self.rebuild_keys()?;
                return Err(e);
            }
            self.docs.push(doc);
            self.reindex(self.docs.len() - 1, None);
        }
        Ok((self.docs.len() - start) as u64)
    }
}
