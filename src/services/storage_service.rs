//! src/services/storage_service.rs
//!
//! StorageService — object payloads on local disk under
//! `base_path/{bucket}/{key}`, plus a single JSON metadata index
//! (`bucket → key → {key, createdAt}`) kept in memory and rewritten as a unit
//! on every mutation.
//!
//! Payload bytes stream to a temp file without holding any lock. Only the
//! commit step (rename into place + index rewrite) and deletes run inside the
//! index write lock, and readers take the read lock while resolving an
//! object, so nobody observes bytes without metadata or the reverse.

use crate::models::metadata::{MetadataIndex, ObjectMetadata};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::RwLock,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object key `{key}` invalid: {reason}")]
    InvalidObjectKey { key: String, reason: String },
    #[error("metadata index is corrupt: {0}")]
    CorruptIndex(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of comparing on-disk payloads with the metadata index.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Index entries whose payload file is missing.
    pub orphaned_metadata: Vec<(String, String)>,
    /// Payload files with no index entry.
    pub untracked_objects: Vec<(String, String)>,
    /// Leftover `.tmp-*` files from interrupted uploads.
    pub stale_temp_files: usize,
    /// Whether the differences above were fixed.
    pub repaired: bool,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.orphaned_metadata.is_empty() && self.untracked_objects.is_empty()
    }
}

#[derive(Clone)]
pub struct StorageService {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Location of the JSON metadata index.
    pub metadata_path: PathBuf,

    /// In-memory copy of the index; the lock doubles as the commit section.
    index: Arc<RwLock<MetadataIndex>>,
}

const MAX_OBJECT_KEY_LEN: usize = 255;
const MAX_BUCKET_NAME_LEN: usize = 63;
const TMP_PREFIX: &str = ".tmp-";
/// Keys shadowed by static bucket-level routes.
const RESERVED_KEYS: [&str; 1] = ["list"];

impl StorageService {
    /// Open the store rooted at `base_path`, loading the index from
    /// `metadata_path` (a missing file is an empty index).
    pub async fn open(
        base_path: impl Into<PathBuf>,
        metadata_path: impl Into<PathBuf>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();
        let metadata_path = metadata_path.into();
        fs::create_dir_all(&base_path).await?;
        let index = read_index_file(&metadata_path).await?;
        debug!(
            buckets = index.len(),
            path = %metadata_path.display(),
            "loaded metadata index"
        );
        Ok(Self {
            base_path,
            metadata_path,
            index: Arc::new(RwLock::new(index)),
        })
    }

    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        check_segment(name, MAX_BUCKET_NAME_LEN).map_err(|reason| {
            StorageError::InvalidBucketName {
                name: name.to_string(),
                reason: reason.into(),
            }
        })
    }

    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidObjectKey {
            key: key.to_string(),
            reason: reason.into(),
        };
        check_segment(key, MAX_OBJECT_KEY_LEN).map_err(invalid)?;
        if RESERVED_KEYS.contains(&key) {
            return Err(invalid("reserved for bucket listing"));
        }
        Ok(())
    }

    /// Check that `(bucket, key)` names an object this store can hold.
    pub fn validate_names(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(key)
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.bucket_root(bucket).join(key)
    }

    /// Durably rewrite the index file via temp file + rename.
    async fn persist_index(&self, index: &MetadataIndex) -> StorageResult<()> {
        if let Some(parent) = self.metadata_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = self
            .metadata_path
            .with_extension(format!("json.tmp-{}", Uuid::new_v4()));
        let payload = serde_json::to_vec_pretty(index)?;

        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&payload).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &self.metadata_path).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        Ok(())
    }

    /// Stream an object to disk and record its metadata.
    ///
    /// - Writes bytes to a temp file next to the destination and fsyncs it.
    /// - Inside the commit section, moves any previous payload aside, renames
    ///   the new one into place and upserts the index entry.
    /// - If the index cannot be persisted the new payload is removed and the
    ///   previous one put back, so a failed overwrite changes nothing.
    pub async fn save<S>(&self, bucket: &str, key: &str, stream: S) -> StorageResult<ObjectMetadata>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(key)?;

        let parent = self.bucket_root(bucket);
        fs::create_dir_all(&parent).await?;
        let file_path = self.object_path(bucket, key);
        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));

        let size_bytes = match write_stream(&tmp_path, stream).await {
            Ok(size) => size,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };

        let mut index = self.index.write().await;

        let backup = match stash_aside(&file_path, &parent).await {
            Ok(backup) => backup,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            restore(backup.as_deref(), &file_path).await;
            return Err(StorageError::Io(err));
        }

        let meta = ObjectMetadata::new(key, Utc::now());
        let mut next = index.clone();
        next.entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), meta.clone());

        if let Err(err) = self.persist_index(&next).await {
            warn!(
                bucket,
                key,
                error = %err,
                "metadata write failed, rolling back uploaded payload"
            );
            let _ = fs::remove_file(&file_path).await;
            restore(backup.as_deref(), &file_path).await;
            return Err(err);
        }

        discard(backup.as_deref()).await;
        *index = next;
        debug!(bucket, key, size_bytes, "stored object");
        Ok(meta)
    }

    /// Resolve an object for reading.
    ///
    /// Returns its metadata and an open file handle; the handle stays valid
    /// even if the object is replaced or deleted while it is being streamed.
    pub async fn load(&self, bucket: &str, key: &str) -> StorageResult<(ObjectMetadata, File)> {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(key)?;

        let not_found = || StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };

        let index = self.index.read().await;
        let meta = index
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(not_found)?;

        let file = File::open(self.object_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    warn!(bucket, key, "metadata present but payload missing");
                    not_found()
                } else {
                    StorageError::Io(err)
                }
            })?;

        Ok((meta, file))
    }

    /// Remove an object's payload and metadata.
    ///
    /// Idempotent: deleting an absent object succeeds.
    pub async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(key)?;

        let mut index = self.index.write().await;

        let parent = self.bucket_root(bucket);
        let file_path = self.object_path(bucket, key);
        let backup = stash_aside(&file_path, &parent).await?;
        if backup.is_none() {
            debug!("file {} already missing", file_path.display());
        }

        let mut next = index.clone();
        if forget_entry(&mut next, bucket, key) {
            if let Err(err) = self.persist_index(&next).await {
                warn!(
                    bucket,
                    key,
                    error = %err,
                    "metadata write failed, restoring deleted payload"
                );
                restore(backup.as_deref(), &file_path).await;
                return Err(err);
            }
        }

        discard(backup.as_deref()).await;
        *index = next;
        Ok(())
    }

    /// Keys currently stored in `bucket`; empty for an unknown bucket.
    pub async fn list(&self, bucket: &str) -> StorageResult<Vec<String>> {
        self.ensure_bucket_name_safe(bucket)?;
        let index = self.index.read().await;
        Ok(index
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Compare payload files on disk with the metadata index.
    ///
    /// With `repair`, orphaned index entries are dropped, untracked payloads
    /// are adopted (with their file mtime as `createdAt`) and stale temp
    /// files are deleted. Holds the commit section for the whole scan.
    pub async fn reconcile(&self, repair: bool) -> StorageResult<ReconcileReport> {
        let mut index = self.index.write().await;
        let mut report = ReconcileReport::default();
        let mut on_disk = BTreeSet::new();

        let mut buckets = fs::read_dir(&self.base_path).await?;
        while let Some(bucket_entry) = buckets.next_entry().await? {
            if !bucket_entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(bucket) = bucket_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.ensure_bucket_name_safe(&bucket).is_err() {
                continue;
            }

            let mut objects = fs::read_dir(bucket_entry.path()).await?;
            while let Some(object_entry) = objects.next_entry().await? {
                let name = object_entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(TMP_PREFIX) {
                    report.stale_temp_files += 1;
                    if repair {
                        let _ = fs::remove_file(object_entry.path()).await;
                    }
                    continue;
                }
                if !object_entry.file_type().await?.is_file() {
                    continue;
                }
                if !index.get(&bucket).is_some_and(|o| o.contains_key(&name)) {
                    report.untracked_objects.push((bucket.clone(), name.clone()));
                }
                on_disk.insert((bucket.clone(), name));
            }
        }

        for (bucket, objects) in index.iter() {
            for key in objects.keys() {
                if !on_disk.contains(&(bucket.clone(), key.clone())) {
                    report.orphaned_metadata.push((bucket.clone(), key.clone()));
                }
            }
        }

        if repair && !report.is_consistent() {
            let mut next = index.clone();
            for (bucket, key) in &report.orphaned_metadata {
                forget_entry(&mut next, bucket, key);
            }
            for (bucket, key) in &report.untracked_objects {
                let created_at = fs::metadata(self.object_path(bucket, key))
                    .await
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                next.entry(bucket.clone())
                    .or_default()
                    .insert(key.clone(), ObjectMetadata::new(key.clone(), created_at));
            }
            self.persist_index(&next).await?;
            *index = next;
            info!(
                orphaned = report.orphaned_metadata.len(),
                untracked = report.untracked_objects.len(),
                "metadata index repaired"
            );
        }
        report.repaired = repair;

        Ok(report)
    }

    /// Best-effort disk round trip used by readiness checks.
    pub async fn check_disk(&self) -> Result<(), String> {
        let tmp_path = self
            .base_path
            .join(format!("{}readyz-{}", TMP_PREFIX, Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz")
            .await
            .map_err(|e| format!("could not write tmp file: {}", e))?;
        let read = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        match read {
            Ok(bytes) if bytes == b"readyz" => Ok(()),
            Ok(_) => Err("file content mismatch".to_string()),
            Err(e) => Err(format!("could not read tmp file: {}", e)),
        }
    }

    /// Check that the persisted index is still parseable.
    pub async fn check_index(&self) -> Result<(), String> {
        read_index_file(&self.metadata_path)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Move an existing payload at `path` to a temp name inside `dir`.
///
/// Returns the temp path, or `None` when there was nothing to move.
async fn stash_aside(path: &Path, dir: &Path) -> io::Result<Option<PathBuf>> {
    let backup = dir.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
    match fs::rename(path, &backup).await {
        Ok(()) => Ok(Some(backup)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Put a stashed payload back at `path`.
async fn restore(backup: Option<&Path>, path: &Path) {
    let Some(backup) = backup else {
        return;
    };
    if let Err(err) = fs::rename(backup, path).await {
        warn!(
            "failed to restore {} from {}: {}",
            path.display(),
            backup.display(),
            err
        );
    }
}

/// Drop a stashed payload once the commit went through.
async fn discard(backup: Option<&Path>) {
    if let Some(backup) = backup {
        if let Err(err) = fs::remove_file(backup).await {
            debug!("failed to remove {}: {}", backup.display(), err);
        }
    }
}

/// Write a byte stream to `path`, flushed and fsynced. Returns bytes written.
async fn write_stream<S>(path: &Path, stream: S) -> io::Result<u64>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: u64 = 0;
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(size_bytes)
}

async fn read_index_file(path: &Path) -> StorageResult<MetadataIndex> {
    match fs::read(path).await {
        Ok(raw) if raw.is_empty() => Ok(MetadataIndex::new()),
        Ok(raw) => Ok(serde_json::from_slice(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(MetadataIndex::new()),
        Err(err) => Err(StorageError::Io(err)),
    }
}

/// Drop `(bucket, key)` from `index`, pruning the bucket when it empties.
fn forget_entry(index: &mut MetadataIndex, bucket: &str, key: &str) -> bool {
    let Some(objects) = index.get_mut(bucket) else {
        return false;
    };
    let removed = objects.remove(key).is_some();
    if objects.is_empty() {
        index.remove(bucket);
    }
    removed
}

/// Validate a bucket name or key as a single, unambiguous path segment.
///
/// Only characters that need no percent-encoding inside a URL path segment
/// are allowed, so the canonical signing path is exactly what appears in a
/// presigned URL. Leading dots are rejected (`.`, `..`, temp files).
fn check_segment(segment: &str, max_len: usize) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("must not be empty");
    }
    if segment.len() > max_len {
        return Err("too long");
    }
    if segment.starts_with('.') {
        return Err("must not start with a dot");
    }
    if !segment.bytes().all(|b| {
        b.is_ascii_alphanumeric()
            || matches!(
                b,
                b'-' | b'_' | b'.' | b'~' | b'!' | b'$' | b'\'' | b'(' | b')' | b'*' | b'+'
                    | b',' | b';' | b'=' | b':' | b'@'
            )
    }) {
        return Err("contains characters outside the URL-safe path segment set");
    }
    Ok(())
}
