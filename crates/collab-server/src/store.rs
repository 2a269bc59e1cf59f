//! SnapshotStore trait abstraction for durable document snapshots.
//!
//! Implementations:
//! - `FileStore` - One snapshot file per form id under a data directory
//! - `InMemoryStore` - For testing, with injectable store failures
//!
//! `store` calls for the same document id are never interleaved: the
//! per-document actor is the only writer and awaits each store before
//! starting the next one.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Store failure injected for testing")]
    Injected,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Current time in milliseconds since Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A persisted snapshot record.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    /// Opaque CRDT snapshot bytes.
    pub data: Vec<u8>,
    /// Last-updated time in milliseconds since Unix epoch.
    pub updated_at_ms: u64,
}

/// Durable storage of opaque binary snapshots, keyed by document id.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Fetch the latest snapshot, or None if the document was never stored.
    async fn fetch(&self, form_id: &str) -> Result<Option<StoredSnapshot>>;

    /// Fully replace the stored snapshot. Either replaces it completely or
    /// fails; never leaves a partial record.
    async fn store(&self, form_id: &str, data: &[u8]) -> Result<()>;
}

/// Filesystem-backed snapshot store: `<data_dir>/<form_id>.crdt`.
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn snapshot_path(&self, form_id: &str) -> PathBuf {
        self.data_dir.join(format!("{form_id}.crdt"))
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn fetch(&self, form_id: &str) -> Result<Option<StoredSnapshot>> {
        let path = self.snapshot_path(form_id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        let updated_at_ms = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or_else(now_ms);

        Ok(Some(StoredSnapshot {
            data,
            updated_at_ms,
        }))
    }

    async fn store(&self, form_id: &str, data: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        // Write to a temp file and rename so the record is replaced whole
        let path = self.snapshot_path(form_id);
        let tmp = self.data_dir.join(format!("{form_id}.crdt.tmp"));
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}

/// In-memory snapshot store for testing.
pub struct InMemoryStore {
    records: RwLock<HashMap<String, StoredSnapshot>>,
    fail_stores: AtomicBool,
    fail_fetches: AtomicBool,
    store_count: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            fail_stores: AtomicBool::new(false),
            fail_fetches: AtomicBool::new(false),
            store_count: AtomicUsize::new(0),
        }
    }

    /// Make subsequent `store` calls fail, for exercising the retry path.
    pub fn set_fail_stores(&self, fail: bool) {
        self.fail_stores.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `fetch` calls fail, for exercising "start empty".
    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `store` calls so far.
    pub fn store_count(&self) -> usize {
        self.store_count.load(Ordering::SeqCst)
    }

    /// Direct read of a stored record, bypassing the trait.
    pub fn get(&self, form_id: &str) -> Option<StoredSnapshot> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(form_id)
            .cloned()
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn fetch(&self, form_id: &str) -> Result<Option<StoredSnapshot>> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(StoreError::Injected);
        }
        Ok(self.get(form_id))
    }

    async fn store(&self, form_id: &str, data: &[u8]) -> Result<()> {
        if self.fail_stores.load(Ordering::SeqCst) {
            return Err(StoreError::Injected);
        }
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                form_id.to_string(),
                StoredSnapshot {
                    data: data.to_vec(),
                    updated_at_ms: now_ms(),
                },
            );
        self.store_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path().to_path_buf());

        assert!(store.fetch("form-1").await.unwrap().is_none());

        store.store("form-1", b"snapshot-bytes").await.unwrap();
        let fetched = store.fetch("form-1").await.unwrap().unwrap();
        assert_eq!(fetched.data, b"snapshot-bytes");
        assert!(fetched.updated_at_ms > 0);
    }

    #[tokio::test]
    async fn test_file_store_replaces_whole_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path().to_path_buf());

        store.store("form-1", b"first").await.unwrap();
        store.store("form-1", b"second, longer record").await.unwrap();

        let fetched = store.fetch("form-1").await.unwrap().unwrap();
        assert_eq!(fetched.data, b"second, longer record");
    }

    #[tokio::test]
    async fn test_in_memory_store_failure_injection() {
        let store = InMemoryStore::new();

        store.store("form-1", b"ok").await.unwrap();
        assert_eq!(store.store_count(), 1);

        store.set_fail_stores(true);
        assert!(store.store("form-1", b"fails").await.is_err());
        assert_eq!(store.store_count(), 1);
        assert_eq!(store.get("form-1").unwrap().data, b"ok");

        store.set_fail_stores(false);
        store.store("form-1", b"recovered").await.unwrap();
        assert_eq!(store.get("form-1").unwrap().data, b"recovered");
    }
}
