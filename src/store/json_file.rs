// src/store/json_file.rs
//! Collection persisted as `<data_dir>/<database>/<collection>.json` with its
//! index definitions alongside in `<collection>.indexes.json`.
//!
//! The files are the only state. Every operation takes an advisory lock on
//! `<collection>.lock` (shared to read, exclusive to write) and reloads from
//! disk under it, so stores opened by separate runs on one directory see each
//! other's writes.

use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use super::collection::Collection;
use super::{Document, DocumentStore, Filter, IndexSpec, StoreError, UpsertOutcome};

#[derive(Debug)]
pub struct JsonFileStore {
    name: String,
    docs_path: PathBuf,
    index_path: PathBuf,
    lock_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Shared,
    Exclusive,
}

/// Which files a write has to rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Touches {
    Documents,
    Indexes,
}

fn io_error(context: &str, path: &Path, e: io::Error) -> StoreError {
    let msg = format!("{context} {}: {e}", path.display());
    match e.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            StoreError::Transient(msg)
        }
        _ => StoreError::Fatal(msg),
    }
}

fn read_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Fatal(format!("corrupt {}: {e}", path.display()))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(io_error("read", path, e)),
    }
}

/// Write to a sibling temp file and rename over the target. Callers hold the
/// exclusive lock, so one temp name per target is enough.
fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| StoreError::Fatal(format!("encode {}: {e}", path.display())))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| io_error("write", &tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error("rename", path, e))
}

impl JsonFileStore {
    /// Opens (creating directories as needed) the collection files and checks
    /// that whatever is already there loads.
    pub fn open(data_dir: &Path, database: &str, collection: &str) -> Result<Self, StoreError> {
        let dir = data_dir.join(database);
        fs::create_dir_all(&dir).map_err(|e| io_error("create", &dir, e))?;
        let store = Self {
            name: format!("{database}.{collection}"),
            docs_path: dir.join(format!("{collection}.json")),
            index_path: dir.join(format!("{collection}.indexes.json")),
            lock_path: dir.join(format!("{collection}.lock")),
        };

        let (documents, indexes) = store.read(|c| (c.docs().len(), c.indexes().len()))?;
        tracing::debug!(
            path = %store.docs_path.display(),
            documents,
            indexes,
            "json store opened"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.docs_path
    }

    /// Lock held until the returned handle is dropped.
    fn lock(&self, access: Access) -> Result<File, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| io_error("open", &self.lock_path, e))?;
        let locked = match access {
            Access::Shared => FileExt::lock_shared(&file),
            Access::Exclusive => FileExt::lock_exclusive(&file),
        };
        locked.map_err(|e| io_error("lock", &self.lock_path, e))?;
        Ok(file)
    }

    fn load(&self) -> Result<Collection, StoreError> {
        let docs: Vec<Document> = read_json(&self.docs_path)?;
        let indexes: Vec<IndexSpec> = read_json(&self.index_path)?;
        Collection::from_parts(docs, indexes)
    }

    /// Reload, apply `f`, and persist, all under the exclusive lock. A failed
    /// `f` or write leaves the files untouched.
    fn commit<T>(
        &self,
        touches: Touches,
        f: impl FnOnce(&mut Collection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _lock = self.lock(Access::Exclusive)?;
        let mut collection = self.load()?;
        let out = f(&mut collection)?;
        match touches {
            Touches::Documents => write_json(&self.docs_path, collection.docs())?,
            Touches::Indexes => write_json(&self.index_path, collection.indexes())?,
        }
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&Collection) -> T) -> Result<T, StoreError> {
        let _lock = self.lock(Access::Shared)?;
        Ok(f(&self.load()?))
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert_by_filter(
        &self,
        filter: &Filter,
        document: &Document,
    ) -> Result<UpsertOutcome, StoreError> {
        self.commit(Touches::Documents, |c| c.upsert(filter, document))
    }

    async fn count_documents(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.read(|c| c.count(filter))
    }

    async fn create_index(&self, index: &IndexSpec) -> Result<bool, StoreError> {
        if self.read(|c| c.indexes().contains(index))? {
            return Ok(false);
        }
        self.commit(Touches::Indexes, |c| c.create_index(index))
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.commit(Touches::Documents, |c| c.delete(filter))
    }

    async fn insert_many(&self, documents: Vec<Document>) -> Result<u64, StoreError> {
        self.commit(Touches::Documents, |c| c.insert_many(documents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn documents_and_indexes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::open(dir.path(), "supmap", "incidents").unwrap();
            assert!(store.create_index(&IndexSpec::unique("identity")).await.unwrap());
            let f = Filter::eq("identity", "S1:R1:1");
            let out = store
                .upsert_by_filter(&f, &doc(json!({"identity": "S1:R1:1", "location": "Lyon"})))
                .await
                .unwrap();
            assert!(out.inserted);
        }
        let store = JsonFileStore::open(dir.path(), "supmap", "incidents").unwrap();
        assert_eq!(store.name(), "supmap.incidents");
        assert_eq!(store.count_documents(&Filter::all()).await.unwrap(), 1);
        assert!(!store.create_index(&IndexSpec::unique("identity")).await.unwrap());
        let dup = store
            .insert_many(vec![doc(json!({"identity": "S1:R1:1"}))])
            .await
            .unwrap_err();
        assert!(matches!(dup, StoreError::DuplicateKey { .. }));
        assert!(dir.path().join("supmap/incidents.indexes.json").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("db")).unwrap();
        fs::write(dir.path().join("db/c.json"), b"{not json").unwrap();
        let err = JsonFileStore::open(dir.path(), "db", "c").unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn stores_on_one_directory_keep_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let a = JsonFileStore::open(dir.path(), "supmap", "incidents").unwrap();
        let b = JsonFileStore::open(dir.path(), "supmap", "incidents").unwrap();
        a.create_index(&IndexSpec::unique("identity")).await.unwrap();

        let fa = Filter::eq("identity", "A");
        let fb = Filter::eq("identity", "B");
        assert!(a.upsert_by_filter(&fa, &doc(json!({"v": 1}))).await.unwrap().inserted);
        assert!(b.upsert_by_filter(&fb, &doc(json!({"v": 2}))).await.unwrap().inserted);
        // b sees a's document and the index a created after b was opened.
        assert!(!b.upsert_by_filter(&fa, &doc(json!({"v": 1}))).await.unwrap().inserted);
        assert!(!b.create_index(&IndexSpec::unique("identity")).await.unwrap());
        assert_eq!(a.count_documents(&Filter::all()).await.unwrap(), 2);

        let fresh = JsonFileStore::open(dir.path(), "supmap", "incidents").unwrap();
        assert_eq!(fresh.count_documents(&Filter::all()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_writers_on_one_directory_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut handles = Vec::new();
        for w in 0..4 {
            let root = dir.path().to_path_buf();
            handles.push(std::thread::spawn(move || {
                let store = JsonFileStore::open(&root, "supmap", "incidents").unwrap();
                for i in 0..10 {
                    let f = Filter::eq("identity", format!("w{w}-{i}"));
                    store.commit(Touches::Documents, |c| c.upsert(&f, &Document::new())).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let store = JsonFileStore::open(dir.path(), "supmap", "incidents").unwrap();
        assert_eq!(store.count_documents(&Filter::all()).await.unwrap(), 40);
    }
}
