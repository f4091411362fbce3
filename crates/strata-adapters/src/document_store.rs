//! Document store adapters: versioned JSON documents grouped in collections.
//!
//! Every write bumps the document version. Conditional writes give the layers
//! above compare-and-swap without any locking of their own.

use crate::adapter::Adapter;
use crate::error::{AdapterError, AdapterResult};
use crate::fs_util;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub version: u64,
    pub value: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritePrecondition {
    None,
    DoesNotExist,
    MatchesVersion(u64),
}

impl WritePrecondition {
    /// Check against the current version (`None` if absent).
    fn check(&self, collection: &str, key: &str, current: Option<u64>) -> AdapterResult<()> {
        match (self, current) {
            (Self::None, _) => Ok(()),
            (Self::DoesNotExist, None) => Ok(()),
            (Self::DoesNotExist, Some(_)) => Err(AdapterError::Conflict(format!(
                "{}/{} already exists",
                collection, key
            ))),
            (Self::MatchesVersion(want), Some(have)) if *want == have => Ok(()),
            (Self::MatchesVersion(want), have) => Err(AdapterError::Conflict(format!(
                "{}/{} is at version {:?}, expected {}",
                collection, key, have, want
            ))),
        }
    }
}

#[async_trait::async_trait]
pub trait DocumentStoreAdapter: Adapter {
    async fn get(&self, collection: &str, key: &str) -> AdapterResult<Document>;

    /// Returns the new version. A failed precondition is `Conflict`.
    async fn put(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
        precondition: WritePrecondition,
    ) -> AdapterResult<u64>;

    /// Idempotent.
    async fn delete(&self, collection: &str, key: &str) -> AdapterResult<()>;

    async fn list_keys(&self, collection: &str, prefix: &str) -> AdapterResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

pub struct MemoryDocumentStore {
    docs: DashMap<(String, String), Document>,
    closed: AtomicBool,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::unavailable("metadata_store", "adapter shut down"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Adapter for MemoryDocumentStore {
    fn name(&self) -> &str {
        "metadata_store"
    }

    fn technology(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> AdapterResult<()> {
        self.check_open()
    }

    async fn shutdown(&self) -> AdapterResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStoreAdapter for MemoryDocumentStore {
    async fn get(&self, collection: &str, key: &str) -> AdapterResult<Document> {
        self.check_open()?;
        self.docs
            .get(&(collection.to_string(), key.to_string()))
            .map(|d| d.clone())
            .ok_or_else(|| AdapterError::NotFound(format!("{}/{}", collection, key)))
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
        precondition: WritePrecondition,
    ) -> AdapterResult<u64> {
        use dashmap::mapref::entry::Entry;

        self.check_open()?;
        // The entry guard holds the shard lock, so check-and-write is atomic.
        match self.docs.entry((collection.to_string(), key.to_string())) {
            Entry::Occupied(mut e) => {
                precondition.check(collection, key, Some(e.get().version))?;
                let version = e.get().version + 1;
                e.insert(Document { version, value });
                Ok(version)
            }
            Entry::Vacant(e) => {
                precondition.check(collection, key, None)?;
                e.insert(Document { version: 1, value });
                Ok(1)
            }
        }
    }

    async fn delete(&self, collection: &str, key: &str) -> AdapterResult<()> {
        self.check_open()?;
        self.docs.remove(&(collection.to_string(), key.to_string()));
        Ok(())
    }

    async fn list_keys(&self, collection: &str, prefix: &str) -> AdapterResult<Vec<String>> {
        self.check_open()?;
        let mut keys: Vec<String> = self
            .docs
            .iter()
            .filter(|e| e.key().0 == collection && e.key().1.starts_with(prefix))
            .map(|e| e.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// One JSON file per document: `<root>/<collection>/<encoded key>.json`.
///
/// Writes are serialized through a single mutex, so version checks cannot
/// interleave within one process. Multiple processes sharing a root are not
/// supported.
pub struct LocalFsDocumentStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl LocalFsDocumentStore {
    pub async fn open(root: impl AsRef<Path>) -> AdapterResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs_util::ensure_dir("metadata_store", &root).await?;
        tracing::debug!("document store opened at {}", root.display());
        Ok(Self {
            root,
            write_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::unavailable("metadata_store", "adapter shut down"));
        }
        Ok(())
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(fs_util::encode_key(collection))
    }

    fn doc_path(&self, collection: &str, key: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(format!("{}.json", fs_util::encode_key(key)))
    }

    async fn read_doc(&self, collection: &str, key: &str) -> AdapterResult<Option<Document>> {
        let path = self.doc_path(collection, key);
        let subject = format!("{}/{}", collection, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                AdapterError::unknown("metadata_store", format!("{} is corrupt: {}", subject, e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AdapterError::from_io("metadata_store", &subject, e)),
        }
    }
}

#[async_trait::async_trait]
impl Adapter for LocalFsDocumentStore {
    fn name(&self) -> &str {
        "metadata_store"
    }

    fn technology(&self) -> &str {
        "local_fs"
    }

    async fn health_check(&self) -> AdapterResult<()> {
        self.check_open()?;
        fs_util::ensure_dir("metadata_store", &self.root).await
    }

    async fn shutdown(&self) -> AdapterResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStoreAdapter for LocalFsDocumentStore {
    async fn get(&self, collection: &str, key: &str) -> AdapterResult<Document> {
        self.check_open()?;
        self.read_doc(collection, key)
            .await?
            .ok_or_else(|| AdapterError::NotFound(format!("{}/{}", collection, key)))
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
        precondition: WritePrecondition,
    ) -> AdapterResult<u64> {
        self.check_open()?;
        let _guard = self.write_lock.lock().await;

        let current = self.read_doc(collection, key).await?.map(|d| d.version);
        precondition.check(collection, key, current)?;

        let doc = Document {
            version: current.unwrap_or(0) + 1,
            value,
        };
        let bytes = serde_json::to_vec(&doc)
            .map_err(|e| AdapterError::unknown("metadata_store", e.to_string()))?;
        fs_util::write_atomic("metadata_store", &self.doc_path(collection, key), &bytes).await?;
        Ok(doc.version)
    }

    async fn delete(&self, collection: &str, key: &str) -> AdapterResult<()> {
        self.check_open()?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.doc_path(collection, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AdapterError::from_io(
                "metadata_store",
                &format!("{}/{}", collection, key),
                e,
            )),
        }
    }

    async fn list_keys(&self, collection: &str, prefix: &str) -> AdapterResult<Vec<String>> {
        self.check_open()?;
        let dir = self.collection_dir(collection);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AdapterError::from_io("metadata_store", collection, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AdapterError::from_io("metadata_store", collection, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if fs_util::is_tmp_name(&name) {
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            match fs_util::decode_key(stem) {
                Some(key) if key.starts_with(prefix) => keys.push(key),
                Some(_) => {}
                None => tracing::warn!("skipping undecodable document name {}", name),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    async fn exercise_contract(store: &dyn DocumentStoreAdapter) {
        let v1 = store
            .put("records", "file:acme:s-1:f1", json!({"a": 1}), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        assert_eq!(v1, 1);

        let dup = store
            .put("records", "file:acme:s-1:f1", json!({"a": 2}), WritePrecondition::DoesNotExist)
            .await
            .unwrap_err();
        assert!(matches!(dup, AdapterError::Conflict(_)));

        let stale = store
            .put("records", "file:acme:s-1:f1", json!({"a": 3}), WritePrecondition::MatchesVersion(7))
            .await
            .unwrap_err();
        assert!(matches!(stale, AdapterError::Conflict(_)));

        let v2 = store
            .put("records", "file:acme:s-1:f1", json!({"a": 4}), WritePrecondition::MatchesVersion(1))
            .await
            .unwrap();
        assert_eq!(v2, 2);

        let doc = store.get("records", "file:acme:s-1:f1").await.unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.value["a"], 4);

        store
            .put("records", "file:acme:s-2:f9", json!(null), WritePrecondition::None)
            .await
            .unwrap();
        store
            .put("other", "file:acme:s-1:zz", json!(null), WritePrecondition::None)
            .await
            .unwrap();
        let keys = store.list_keys("records", "file:acme:s-1:").await.unwrap();
        assert_eq!(keys, vec!["file:acme:s-1:f1".to_string()]);

        store.delete("records", "file:acme:s-1:f1").await.unwrap();
        store.delete("records", "file:acme:s-1:f1").await.unwrap();
        assert!(store.get("records", "file:acme:s-1:f1").await.unwrap_err().is_not_found());
        assert!(store.list_keys("missing", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_honours_contract() {
        exercise_contract(&MemoryDocumentStore::new()).await;
    }

    #[tokio::test]
    async fn local_fs_store_honours_contract() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalFsDocumentStore::open(tmp.path()).await.unwrap();
        exercise_contract(&store).await;
    }

    #[tokio::test]
    async fn local_fs_documents_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = LocalFsDocumentStore::open(tmp.path()).await.unwrap();
            store
                .put("executions", "exec-1", json!({"state": "running"}), WritePrecondition::None)
                .await
                .unwrap();
            store.shutdown().await.unwrap();
        }
        let store = LocalFsDocumentStore::open(tmp.path()).await.unwrap();
        let doc = store.get("executions", "exec-1").await.unwrap();
        assert_eq!(doc.value["state"], "running");
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn concurrent_create_has_one_winner() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put("c", "k", json!(i), WritePrecondition::DoesNotExist)
                    .await
                    .is_ok()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
