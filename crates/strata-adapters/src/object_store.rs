//! Object store adapters: opaque blobs addressed by slash-separated keys.
//!
//! Today: memory and local filesystem. The contract is shaped after cloud
//! object stores so a bucket-backed adapter drops in behind the same trait.

use crate::adapter::Adapter;
use crate::error::{AdapterError, AdapterResult};
use crate::fs_util;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait ObjectStoreAdapter: Adapter {
    /// Unconditional write. Overwrites an existing object.
    async fn put_object(&self, key: &str, data: Bytes) -> AdapterResult<ObjectMeta>;

    /// `NotFound` if the object does not exist.
    async fn get_object(&self, key: &str) -> AdapterResult<Bytes>;

    async fn head_object(&self, key: &str) -> AdapterResult<Option<ObjectMeta>>;

    /// Succeeds even if the object does not exist.
    async fn delete_object(&self, key: &str) -> AdapterResult<()>;

    /// Objects whose key starts with `prefix`, in arbitrary order.
    async fn list_objects(&self, prefix: &str) -> AdapterResult<Vec<ObjectMeta>>;
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// In-memory object store. Contents vanish with the process.
pub struct MemoryObjectStore {
    objects: DashMap<String, (Bytes, DateTime<Utc>)>,
    closed: AtomicBool,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::unavailable("object_store", "adapter shut down"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Adapter for MemoryObjectStore {
    fn name(&self) -> &str {
        "object_store"
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
impl ObjectStoreAdapter for MemoryObjectStore {
    async fn put_object(&self, key: &str, data: Bytes) -> AdapterResult<ObjectMeta> {
        self.check_open()?;
        let now = Utc::now();
        let size = data.len() as u64;
        self.objects.insert(key.to_string(), (data, now));
        Ok(ObjectMeta {
            key: key.to_string(),
            size,
            last_modified: now,
        })
    }

    async fn get_object(&self, key: &str) -> AdapterResult<Bytes> {
        self.check_open()?;
        self.objects
            .get(key)
            .map(|e| e.0.clone())
            .ok_or_else(|| AdapterError::NotFound(key.to_string()))
    }

    async fn head_object(&self, key: &str) -> AdapterResult<Option<ObjectMeta>> {
        self.check_open()?;
        Ok(self.objects.get(key).map(|e| ObjectMeta {
            key: key.to_string(),
            size: e.0.len() as u64,
            last_modified: e.1,
        }))
    }

    async fn delete_object(&self, key: &str) -> AdapterResult<()> {
        self.check_open()?;
        self.objects.remove(key);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> AdapterResult<Vec<ObjectMeta>> {
        self.check_open()?;
        Ok(self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| ObjectMeta {
                key: e.key().clone(),
                size: e.value().0.len() as u64,
                last_modified: e.value().1,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Directory-backed object store: key `a/b/c` lives at `<root>/a/b/c`.
pub struct LocalFsObjectStore {
    root: PathBuf,
    closed: AtomicBool,
}

impl LocalFsObjectStore {
    /// Creates `root` if needed. Fails if it cannot be used as a directory.
    pub async fn open(root: impl AsRef<Path>) -> AdapterResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs_util::ensure_dir("object_store", &root).await?;
        tracing::debug!("object store opened at {}", root.display());
        Ok(Self {
            root,
            closed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::unavailable("object_store", "adapter shut down"));
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> AdapterResult<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AdapterError::unknown("object_store", format!("illegal key '{}'", key)));
        }
        Ok(self.root.join(rel))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait::async_trait]
impl Adapter for LocalFsObjectStore {
    fn name(&self) -> &str {
        "object_store"
    }

    fn technology(&self) -> &str {
        "local_fs"
    }

    async fn health_check(&self) -> AdapterResult<()> {
        self.check_open()?;
        fs_util::ensure_dir("object_store", &self.root).await
    }

    async fn shutdown(&self) -> AdapterResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStoreAdapter for LocalFsObjectStore {
    async fn put_object(&self, key: &str, data: Bytes) -> AdapterResult<ObjectMeta> {
        self.check_open()?;
        let path = self.object_path(key)?;
        fs_util::write_atomic("object_store", &path, &data).await?;
        tracing::debug!("wrote {} ({} bytes)", path.display(), data.len());
        Ok(ObjectMeta {
            key: key.to_string(),
            size: data.len() as u64,
            last_modified: Utc::now(),
        })
    }

    async fn get_object(&self, key: &str) -> AdapterResult<Bytes> {
        self.check_open()?;
        let path = self.object_path(key)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| AdapterError::from_io("object_store", key, e))?;
        Ok(Bytes::from(data))
    }

    async fn head_object(&self, key: &str) -> AdapterResult<Option<ObjectMeta>> {
        self.check_open()?;
        let path = self.object_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: meta.len(),
                last_modified: meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AdapterError::from_io("object_store", key, e)),
        }
    }

    async fn delete_object(&self, key: &str) -> AdapterResult<()> {
        self.check_open()?;
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AdapterError::from_io("object_store", key, e)),
        }
    }

    async fn list_objects(&self, prefix: &str) -> AdapterResult<Vec<ObjectMeta>> {
        self.check_open()?;
        let root = self.root.clone();
        let entries = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| !fs_util::is_tmp_name(&e.file_name().to_string_lossy()))
                .map(|e| {
                    let meta = e.metadata().ok();
                    let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
                    let modified = meta
                        .and_then(|m| m.modified().ok())
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(Utc::now);
                    (e.into_path(), size, modified)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| AdapterError::unknown("object_store", format!("list task failed: {}", e)))?;

        Ok(entries
            .into_iter()
            .filter_map(|(path, size, last_modified)| {
                let key = self.key_for(&path)?;
                key.starts_with(prefix).then_some(ObjectMeta {
                    key,
                    size,
                    last_modified,
                })
            })
            .collect())
    }
}
