//! File storage across two stores: blob bytes in the object store, the
//! `FileRecord` in the metadata store.
//!
//! `store` runs as a saga. The blob goes first, then the record, then the
//! optional file-id index entry. A file exists only once its record has
//! committed. If the record cannot be written the blob is deleted again, or,
//! failing that, an orphan marker is left beside it for `reconcile` to sweep.

use crate::retry::{normalize, unavailable_only, Retrier};
use bytes::Bytes;
use chrono::Utc;
use futures::TryFutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_adapters::{DocumentStoreAdapter, ObjectStoreAdapter, WritePrecondition};
use strata_core::{
    validate_segment, Compensation, Error, ErrorKind, FileRecord, FileReference, FileStorage,
    ReconciliationReport, Result,
};
use tracing::{debug, error, info, warn};

const RECORDS: &str = "file_records";
const FILE_INDEX: &str = "file_index";
const BLOB_PREFIX: &str = "blobs/";
const ORPHAN_PREFIX: &str = "orphans/";

/// Written into the object store when a failed saga could not delete its blob.
#[derive(Debug, Serialize, Deserialize)]
struct OrphanMarker {
    file_reference: String,
    blob_key: String,
    reason: String,
    marked_at: chrono::DateTime<Utc>,
}

fn blob_key(reference: &FileReference) -> String {
    format!(
        "{}{}/{}/{}",
        BLOB_PREFIX,
        reference.tenant_id(),
        reference.session_id(),
        reference.file_id()
    )
}

fn orphan_key(reference: &FileReference) -> String {
    format!(
        "{}{}/{}/{}",
        ORPHAN_PREFIX,
        reference.tenant_id(),
        reference.session_id(),
        reference.file_id()
    )
}

fn index_key(tenant_id: &str, file_id: &str) -> String {
    format!("{}:{}", tenant_id, file_id)
}

pub fn sha256_hex(content: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, content);
    digest.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct FileStorageAbstraction {
    objects: Arc<dyn ObjectStoreAdapter>,
    records: Arc<dyn DocumentStoreAdapter>,
    retrier: Retrier,
    index_enabled: bool,
}

impl FileStorageAbstraction {
    pub fn new(
        objects: Arc<dyn ObjectStoreAdapter>,
        records: Arc<dyn DocumentStoreAdapter>,
        retrier: Retrier,
        index_enabled: bool,
    ) -> Self {
        Self {
            objects,
            records,
            retrier,
            index_enabled,
        }
    }

    pub fn index_enabled(&self) -> bool {
        self.index_enabled
    }

    async fn read_record(&self, reference: &FileReference) -> Result<(FileRecord, u64)> {
        let key = reference.to_string();
        let doc = self
            .retrier
            .run("get_record", || self.records.get(RECORDS, &key).map_err(normalize))
            .await?;
        let record: FileRecord = serde_json::from_value(doc.value)
            .map_err(|e| Error::Corrupt(format!("file record {}: {}", key, e)))?;
        Ok((record, doc.version))
    }

    async fn write_index(&self, reference: &FileReference) -> Result<()> {
        let key = index_key(reference.tenant_id(), reference.file_id());
        let value = serde_json::Value::String(reference.to_string());
        self.retrier
            .run_with("put_index", unavailable_only, || {
                self.records
                    .put(FILE_INDEX, &key, value.clone(), WritePrecondition::None)
                    .map_err(normalize)
            })
            .await
            .map(|_| ())
    }

    /// Undo the blob half of a failed saga. Returns the `PartialCommit` to surface.
    async fn compensate(&self, reference: &FileReference, blob: &str, cause: Error) -> Error {
        let file_id = reference.file_id();
        let reason = format!("file record write failed: {}", cause);

        let rolled_back = self
            .retrier
            .run("compensate_delete", || self.objects.delete_object(blob).map_err(normalize))
            .await;
        if rolled_back.is_ok() {
            warn!("Saga for {} rolled back: {}", reference, cause);
            return Error::partial_commit(file_id, reason, Compensation::RolledBack);
        }

        let marker = OrphanMarker {
            file_reference: reference.to_string(),
            blob_key: blob.to_string(),
            reason: reason.clone(),
            marked_at: Utc::now(),
        };
        let marker_key = orphan_key(reference);
        match serde_json::to_vec(&marker) {
            Ok(body) => {
                let body = Bytes::from(body);
                if let Err(e) = self
                    .retrier
                    .run("orphan_marker", || {
                        self.objects.put_object(&marker_key, body.clone()).map_err(normalize)
                    })
                    .await
                {
                    error!("Blob {} is orphaned and unmarked: {}", blob, e);
                }
            }
            Err(e) => error!("Cannot encode orphan marker for {}: {}", blob, e),
        }
        warn!("Saga for {} left an orphaned blob: {}", reference, cause);
        Error::partial_commit(file_id, reason, Compensation::Orphaned)
    }

    /// One read-modify-write of the tombstone. Retried as a unit on `Conflict`.
    async fn tombstone(&self, reference: &FileReference) -> Result<Option<FileRecord>> {
        let (mut record, version) = self.read_record(reference).await?;
        if record.is_deleted() {
            return Ok(None);
        }
        record.deleted_at = Some(Utc::now());
        let key = reference.to_string();
        self.records
            .put(
                RECORDS,
                &key,
                serde_json::to_value(&record)?,
                WritePrecondition::MatchesVersion(version),
            )
            .await
            .map_err(normalize)?;
        Ok(Some(record))
    }

    async fn sweep_orphans(&self, report: &mut ReconciliationReport) -> Result<()> {
        let markers = self
            .retrier
            .run("list_orphans", || {
                self.objects.list_objects(ORPHAN_PREFIX).map_err(normalize)
            })
            .await?;

        for meta in markers {
            let raw = match self.objects.get_object(&meta.key).await {
                Ok(raw) => raw,
                Err(e) => {
                    report.failures.push(format!("{}: {}", meta.key, e));
                    continue;
                }
            };
            let marker: OrphanMarker = match serde_json::from_slice(&raw) {
                Ok(m) => m,
                Err(e) => {
                    report.failures.push(format!("{}: unreadable marker: {}", meta.key, e));
                    continue;
                }
            };
            let reference: FileReference = match marker.file_reference.parse() {
                Ok(r) => r,
                Err(e) => {
                    report.failures.push(format!("{}: {}", meta.key, e));
                    continue;
                }
            };

            let committed = match self.read_record(&reference).await {
                Ok(_) => true,
                Err(e) if e.kind() == ErrorKind::NotFound => false,
                Err(e) => {
                    report.failures.push(format!("{}: {}", reference, e));
                    continue;
                }
            };

            if !committed {
                if let Err(e) = self.objects.delete_object(&marker.blob_key).await {
                    report.failures.push(format!("{}: {}", marker.blob_key, e));
                    continue;
                }
                report.orphans_removed += 1;
                info!("Removed orphaned blob {}", marker.blob_key);
            }
            match self.objects.delete_object(&meta.key).await {
                Ok(()) => report.markers_cleared += 1,
                Err(e) => report.failures.push(format!("{}: {}", meta.key, e)),
            }
        }
        Ok(())
    }

    async fn rebuild_index(&self, report: &mut ReconciliationReport) -> Result<()> {
        let keys = self
            .retrier
            .run("list_records", || {
                self.records.list_keys(RECORDS, "").map_err(normalize)
            })
            .await?;

        for key in keys {
            let reference: FileReference = match key.parse() {
                Ok(r) => r,
                Err(e) => {
                    report.failures.push(format!("{}: {}", key, e));
                    continue;
                }
            };
            match self.read_record(&reference).await {
                Ok((record, _)) if record.is_deleted() => continue,
                Ok(_) => {}
                Err(e) => {
                    report.failures.push(format!("{}: {}", key, e));
                    continue;
                }
            }
            let entry = index_key(reference.tenant_id(), reference.file_id());
            match self.records.get(FILE_INDEX, &entry).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => match self.write_index(&reference).await {
                    Ok(()) => report.index_entries_rebuilt += 1,
                    Err(e) => report.failures.push(format!("{}: {}", entry, e)),
                },
                Err(e) => report.failures.push(format!("{}: {}", entry, e)),
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl FileStorage for FileStorageAbstraction {
    async fn store(
        &self,
        tenant_id: &str,
        session_id: &str,
        content: Bytes,
        content_type: &str,
    ) -> Result<FileReference> {
        validate_segment("tenant_id", tenant_id)?;
        validate_segment("session_id", session_id)?;

        let reference = FileReference::new(tenant_id, session_id, uuid::Uuid::new_v4().to_string())?;
        let blob = blob_key(&reference);
        let record = FileRecord {
            file_reference: reference.clone(),
            blob_key: blob.clone(),
            content_type: content_type.to_string(),
            size_bytes: content.len() as u64,
            sha256: sha256_hex(&content),
            created_at: Utc::now(),
            deleted_at: None,
        };

        // 1. blob
        self.retrier
            .run("put_blob", || self.objects.put_object(&blob, content.clone()).map_err(normalize))
            .await?;

        // 2. record. Only now does the file exist.
        let record_key = reference.to_string();
        let record_value = serde_json::to_value(&record)?;
        let committed = self
            .retrier
            .run_with("put_record", unavailable_only, || {
                self.records
                    .put(
                        RECORDS,
                        &record_key,
                        record_value.clone(),
                        WritePrecondition::DoesNotExist,
                    )
                    .map_err(normalize)
            })
            .await;
        if let Err(cause) = committed {
            return Err(self.compensate(&reference, &blob, cause).await);
        }

        // 3. index. A miss here only costs direct lookups until reconcile runs.
        if self.index_enabled {
            if let Err(e) = self.write_index(&reference).await {
                warn!("File-id index entry for {} not written: {}", reference, e);
            }
        }

        info!("Stored {} ({} bytes, {})", reference, record.size_bytes, content_type);
        Ok(reference)
    }

    async fn resolve(&self, reference: &FileReference) -> Result<Bytes> {
        let record = match self.read_record(reference).await {
            Ok((record, _)) if record.is_deleted() => {
                return Err(Error::NotFound(format!("{} (deleted)", reference)));
            }
            Ok((record, _)) => record,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let blob = blob_key(reference);
                let orphan = self
                    .retrier
                    .run("head_blob", || self.objects.head_object(&blob).map_err(normalize))
                    .await?;
                return Err(match orphan {
                    Some(_) => Error::partial_commit(
                        reference.file_id(),
                        "blob present without a file record",
                        Compensation::Detected,
                    ),
                    None => Error::NotFound(reference.to_string()),
                });
            }
            Err(e) => return Err(e),
        };

        let content = self
            .retrier
            .run("get_blob", || self.objects.get_object(&record.blob_key).map_err(normalize))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::NotFound(format!("blob for {}", reference)),
                _ => e,
            })?;

        if sha256_hex(&content) != record.sha256 {
            return Err(Error::Corrupt(format!("{} failed checksum verification", reference)));
        }
        debug!("Resolved {} ({} bytes)", reference, content.len());
        Ok(content)
    }

    async fn resolve_by_id(&self, tenant_id: &str, file_id: &str) -> Result<Bytes> {
        let reference = self.locate(tenant_id, file_id).await?;
        self.resolve(&reference).await
    }

    async fn locate(&self, tenant_id: &str, file_id: &str) -> Result<FileReference> {
        validate_segment("tenant_id", tenant_id)?;
        validate_segment("file_id", file_id)?;
        if !self.index_enabled {
            return Err(Error::context_required(format!("file {}", file_id), None));
        }

        let key = index_key(tenant_id, file_id);
        let doc = match self
            .retrier
            .run("get_index", || self.records.get(FILE_INDEX, &key).map_err(normalize))
            .await
        {
            Ok(doc) => doc,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::context_required(format!("file {}", file_id), None));
            }
            Err(e) => return Err(e),
        };

        doc.value
            .as_str()
            .ok_or_else(|| Error::Corrupt(format!("index entry {} is not a string", key)))?
            .parse()
    }

    async fn describe(&self, reference: &FileReference) -> Result<FileRecord> {
        self.read_record(reference).await.map(|(record, _)| record)
    }

    async fn delete(&self, reference: &FileReference) -> Result<()> {
        let Some(record) = self.retrier.run("tombstone", || self.tombstone(reference)).await? else {
            debug!("{} already deleted", reference);
            return Ok(());
        };

        if let Err(e) = self
            .retrier
            .run("delete_blob", || {
                self.objects.delete_object(&record.blob_key).map_err(normalize)
            })
            .await
        {
            warn!("{} tombstoned but blob {} remains: {}", reference, record.blob_key, e);
        }

        if self.index_enabled {
            let key = index_key(reference.tenant_id(), reference.file_id());
            if let Err(e) = self.records.delete(FILE_INDEX, &key).await {
                warn!("Index entry {} not removed: {}", key, e);
            }
        }
        info!("Deleted {}", reference);
        Ok(())
    }

    async fn reconcile(&self) -> Result<ReconciliationReport> {
        let mut report = ReconciliationReport::default();
        self.sweep_orphans(&mut report).await?;
        if self.index_enabled {
            self.rebuild_index(&mut report).await?;
        }
        info!(
            "Reconciled: {} orphans removed, {} markers cleared, {} index entries rebuilt, {} failures",
            report.orphans_removed,
            report.markers_cleared,
            report.index_entries_rebuilt,
            report.failures.len()
        );
        Ok(report)
    }
}
