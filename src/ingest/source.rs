// src/ingest/source.rs
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::model::RawFeedDocument;

/// Anything that can hand over raw feed documents for one run.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_documents(&self) -> Result<Vec<RawFeedDocument>>;
    fn name(&self) -> &str;
}

/// Every `*.xml` file directly under a directory, in file-name order.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_xml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xml"))
}

#[async_trait::async_trait]
impl FeedSource for DirectorySource {
    async fn fetch_documents(&self) -> Result<Vec<RawFeedDocument>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("listing feed directory {}", self.dir.display()))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_xml(&path) && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut docs = Vec::with_capacity(paths.len());
        for path in paths {
            let content = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading feed file {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            docs.push(RawFeedDocument::new(name, content));
        }
        tracing::debug!(dir = %self.dir.display(), files = docs.len(), "feed directory scanned");
        Ok(docs)
    }

    fn name(&self) -> &str {
        "directory"
    }
}

/// Fixed in-memory documents (tests, replays).
#[derive(Debug, Clone, Default)]
pub struct FixtureSource {
    docs: Vec<RawFeedDocument>,
}

impl FixtureSource {
    pub fn new(docs: Vec<RawFeedDocument>) -> Self {
        Self { docs }
    }

    pub fn with(mut self, source_file: &str, content: impl Into<Vec<u8>>) -> Self {
        self.docs.push(RawFeedDocument::new(source_file, content));
        self
    }
}

#[async_trait::async_trait]
impl FeedSource for FixtureSource {
    async fn fetch_documents(&self) -> Result<Vec<RawFeedDocument>> {
        Ok(self.docs.clone())
    }

    fn name(&self) -> &str {
        "fixture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_source_reads_xml_files_in_name_order() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.xml"), b"<b/>").unwrap();
        std::fs::write(tmp.path().join("a.XML"), b"<a/>").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"skip").unwrap();
        std::fs::create_dir(tmp.path().join("sub.xml")).unwrap();

        let docs = DirectorySource::new(tmp.path())
            .fetch_documents()
            .await
            .unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.source_file.as_str()).collect();
        assert_eq!(names, vec!["a.XML", "b.xml"]);
        assert_eq!(docs[1].content, b"<b/>");
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let src = DirectorySource::new(tmp.path().join("nope"));
        assert!(src.fetch_documents().await.is_err());
    }
}
