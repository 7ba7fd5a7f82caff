//! Local-filesystem storage backend.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/content/vol-NN/<id>.bytes        content
//! <root>/content/vol-NN/<id>.properties   sidecar attributes
//! ```
//!
//! `vol-NN` fans blobs out over 64 directories keyed by a hash of the id,
//! keeping directory sizes bounded for any id shape. Both files are written
//! to a temp file in the destination directory, synced, then renamed, so a
//! reader never observes a half-written blob. The sidecar is written after
//! the content and removed before it: a crash can orphan content bytes
//! (invisible, reclaimed out of band) but never yields a readable blob
//! without its record.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use cask_types::{BlobId, Headers, HashAlgorithm};

use crate::attributes::BlobAttributes;
use crate::blob::{Blob, BlobContent};
use crate::cancel::CancelToken;
use crate::config::{BlobStoreConfiguration, FILE_SECTION};
use crate::error::{StoreError, StoreResult};
use crate::metrics::{OperationMetrics, OperationMetricsSnapshot, StoreUsage, UsageCounters};
use crate::quota::QuotaService;
use crate::support::{
    compaction_threshold, copy_and_hash, eligible_for_compaction, ensure_no_temporary_header,
    now_millis, promote_headers, IdLocks, Lifecycle, LifecycleState,
};
use crate::traits::BlobStore;

const BYTES_EXT: &str = "bytes";
const PROPERTIES_EXT: &str = "properties";
const FANOUT: u64 = 64;

/// Blob store backed by a local filesystem directory.
pub struct FileBlobStore {
    config: BlobStoreConfiguration,
    root: PathBuf,
    algorithm: HashAlgorithm,
    lifecycle: Lifecycle,
    usage: UsageCounters,
    ops: OperationMetrics,
    id_locks: IdLocks,
}

impl FileBlobStore {
    /// Build a store from its configuration. The store must be
    /// [`start`](BlobStore::start)ed before use.
    pub fn new(config: BlobStoreConfiguration) -> StoreResult<Self> {
        config.validate()?;
        if config.store_type != "file" {
            return Err(StoreError::Config(format!(
                "store {:?} is of type {:?}, not \"file\"",
                config.name, config.store_type
            )));
        }
        let root = config.file_path().ok_or_else(|| {
            StoreError::Config(format!("store {:?} has no file.path", config.name))
        })?;
        let algorithm = config.hash_algorithm(FILE_SECTION)?;
        Ok(Self {
            config,
            root,
            algorithm,
            lifecycle: Lifecycle::new(),
            usage: UsageCounters::new(),
            ops: OperationMetrics::new(),
            id_locks: IdLocks::default(),
        })
    }

    /// The store's root directory.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn content_dir(&self) -> PathBuf {
        self.root.join("content")
    }

    fn volume_dir(&self, id: &BlobId) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        id.as_str().hash(&mut hasher);
        self.content_dir()
            .join(format!("vol-{:02}", hasher.finish() % FANOUT))
    }

    fn bytes_path(&self, id: &BlobId) -> PathBuf {
        self.volume_dir(id).join(format!("{id}.{BYTES_EXT}"))
    }

    fn properties_path(&self, id: &BlobId) -> PathBuf {
        self.volume_dir(id).join(format!("{id}.{PROPERTIES_EXT}"))
    }

    fn read_attributes(&self, id: &BlobId) -> StoreResult<Option<BlobAttributes>> {
        let path = self.properties_path(id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        BlobAttributes::parse_properties(&text).map(Some)
    }

    /// Durably write the sidecar: temp file in the same volume, sync,
    /// rename over the destination.
    fn write_attributes(&self, id: &BlobId, attrs: &BlobAttributes) -> StoreResult<()> {
        let dir = self.volume_dir(id);
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(attrs.to_properties().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.properties_path(id))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn blob_from(&self, id: BlobId, attrs: BlobAttributes) -> Blob {
        let content = BlobContent::File(self.bytes_path(&id));
        Blob::new(id, self.config.name.clone(), attrs.headers, attrs.metrics, content)
    }

    fn get_impl(&self, id: &BlobId, include_deleted: bool) -> StoreResult<Option<Blob>> {
        self.lifecycle.ensure_started(self.name())?;
        let Some(attrs) = self.read_attributes(id)? else {
            return Ok(None);
        };
        if attrs.deleted && !include_deleted {
            return Ok(None);
        }
        if !self.bytes_path(id).exists() {
            return Err(StoreError::Corrupt {
                id: id.clone(),
                reason: "attributes present but content missing".to_string(),
            });
        }
        self.ops.record_download(attrs.metrics.size);
        Ok(Some(self.blob_from(id.clone(), attrs)))
    }

    /// Remove sidecar then bytes. Caller holds the id lock.
    fn hard_delete_locked(&self, id: &BlobId) -> StoreResult<bool> {
        let Some(attrs) = self.read_attributes(id)? else {
            return Ok(false);
        };
        fs::remove_file(self.properties_path(id))?;
        match fs::remove_file(self.bytes_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.usage.remove_blob(attrs.metrics.size);
        debug!(store = self.name(), id = %id, "hard-deleted blob");
        Ok(true)
    }
}

impl BlobStore for FileBlobStore {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn configuration(&self) -> &BlobStoreConfiguration {
        &self.config
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    fn start(&self) -> StoreResult<()> {
        fs::create_dir_all(self.content_dir())?;

        // One startup scan rebuilds the usage counters; afterwards they are
        // maintained incrementally.
        let mut count = 0u64;
        let mut bytes = 0u64;
        for entry in WalkDir::new(self.content_dir())
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(PROPERTIES_EXT)
            {
                continue;
            }
            match fs::read_to_string(path).map_err(StoreError::from).and_then(|t| {
                BlobAttributes::parse_properties(&t)
            }) {
                Ok(attrs) => {
                    count += 1;
                    bytes += attrs.metrics.size;
                }
                Err(err) => {
                    warn!(store = self.name(), path = %path.display(), %err,
                        "skipping unreadable attributes during startup scan");
                }
            }
        }
        self.usage.set(count, bytes);
        self.lifecycle.start();
        info!(store = self.name(), blob_count = count, total_bytes = bytes, "store started");
        Ok(())
    }

    fn stop(&self) -> StoreResult<()> {
        self.lifecycle.stop();
        info!(store = self.name(), "store stopped");
        Ok(())
    }

    fn create_with_id(
        &self,
        id: BlobId,
        content: &mut dyn Read,
        mut headers: Headers,
    ) -> StoreResult<Blob> {
        self.lifecycle.ensure_started(self.name())?;
        let _guard = self.id_locks.lock(&id);

        if self.properties_path(&id).exists() {
            return Err(StoreError::IdInUse(id));
        }
        let dir = self.volume_dir(&id);
        fs::create_dir_all(&dir)?;

        // Content first: temp file, sync, rename.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        let (size, hash) = copy_and_hash(content, tmp.as_file_mut(), self.algorithm)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.bytes_path(&id))
            .map_err(|e| StoreError::Io(e.error))?;

        headers.insert(
            cask_types::headers::TEMPORARY_HEADER.to_string(),
            "true".to_string(),
        );
        let metrics = cask_types::BlobMetrics::new(size, hash, self.algorithm, now_millis());
        let attrs = BlobAttributes::new(headers, metrics);
        if let Err(err) = self.write_attributes(&id, &attrs) {
            // No readable blob may remain after a failed create.
            let _ = fs::remove_file(self.bytes_path(&id));
            return Err(err);
        }

        self.usage.add_blob(size);
        self.ops.record_upload(size);
        debug!(store = self.name(), id = %id, size, "created temporary blob");
        Ok(self.blob_from(id, attrs))
    }

    fn get(&self, id: &BlobId) -> StoreResult<Option<Blob>> {
        self.get_impl(id, false)
    }

    fn get_including_deleted(&self, id: &BlobId) -> StoreResult<Option<Blob>> {
        self.get_impl(id, true)
    }

    fn attributes(&self, id: &BlobId) -> StoreResult<Option<BlobAttributes>> {
        self.lifecycle.ensure_started(self.name())?;
        self.read_attributes(id)
    }

    fn delete(&self, id: &BlobId, reason: &str) -> StoreResult<bool> {
        self.lifecycle.ensure_started(self.name())?;
        let _guard = self.id_locks.lock(id);
        let Some(mut attrs) = self.read_attributes(id)? else {
            return Ok(false);
        };
        if attrs.deleted {
            return Ok(false);
        }
        attrs.mark_deleted(reason, now_millis());
        self.write_attributes(id, &attrs)?;
        debug!(store = self.name(), id = %id, reason, "soft-deleted blob");
        Ok(true)
    }

    fn delete_hard(&self, id: &BlobId) -> StoreResult<bool> {
        self.lifecycle.ensure_started(self.name())?;
        let _guard = self.id_locks.lock(id);
        self.hard_delete_locked(id)
    }

    fn delete_if_temp(&self, blob: &Blob) -> StoreResult<bool> {
        self.lifecycle.ensure_started(self.name())?;
        if blob.origin_store != self.config.name {
            return Ok(false);
        }
        let _guard = self.id_locks.lock(&blob.id);
        match self.read_attributes(&blob.id)? {
            Some(attrs) if attrs.is_temporary() => self.hard_delete_locked(&blob.id),
            _ => Ok(false),
        }
    }

    fn make_permanent(&self, blob: &Blob, headers: Headers) -> StoreResult<Blob> {
        self.lifecycle.ensure_started(self.name())?;
        ensure_no_temporary_header(&headers)?;

        let stored = {
            let _guard = self.id_locks.lock(&blob.id);
            let Some(mut attrs) = self.read_attributes(&blob.id)? else {
                return Err(StoreError::NotFound(blob.id.clone()));
            };
            if attrs.is_temporary() {
                attrs.headers = promote_headers(&attrs.headers, &headers);
                self.write_attributes(&blob.id, &attrs)?;
                debug!(store = self.name(), id = %blob.id, "promoted blob to permanent");
                return Ok(self.blob_from(blob.id.clone(), attrs));
            }
            attrs
        };

        // Already permanent: a retry after an unacknowledged promotion.
        // Copy the content as a fresh permanent blob.
        info!(store = self.name(), id = %blob.id,
            "promotion of a permanent blob, copying as new");
        let mut reader = fs::File::open(self.bytes_path(&blob.id))?;
        let seed = promote_headers(&stored.headers, &headers);
        let copy = self.create_with_id(BlobId::random(), &mut reader, seed)?;

        let _guard = self.id_locks.lock(&copy.id);
        let Some(mut attrs) = self.read_attributes(&copy.id)? else {
            return Err(StoreError::NotFound(copy.id.clone()));
        };
        attrs.headers = promote_headers(&attrs.headers, &Headers::new());
        self.write_attributes(&copy.id, &attrs)?;
        Ok(self.blob_from(copy.id.clone(), attrs))
    }

    fn compact(
        &self,
        usage_checker: Option<&QuotaService>,
        older_than: Duration,
        cancel: &CancelToken,
    ) -> StoreResult<u64> {
        self.lifecycle.ensure_started(self.name())?;
        let Some(threshold) = compaction_threshold(older_than) else {
            return Ok(0);
        };

        let mut removed = 0u64;
        for entry in WalkDir::new(self.content_dir())
            .into_iter()
            .filter_map(Result::ok)
        {
            if cancel.is_canceled() {
                info!(store = self.name(), removed, "compaction canceled");
                break;
            }
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(PROPERTIES_EXT)
            {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(id) = BlobId::parse(stem) else {
                warn!(store = self.name(), path = %path.display(),
                    "skipping sidecar with unparseable id");
                continue;
            };
            let attrs = match self.read_attributes(&id) {
                Ok(Some(attrs)) => attrs,
                Ok(None) => continue,
                Err(err) => {
                    warn!(store = self.name(), id = %id, %err,
                        "skipping unreadable attributes");
                    continue;
                }
            };
            if !eligible_for_compaction(&attrs, threshold) {
                continue;
            }
            match self.delete_hard(&id) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(store = self.name(), id = %id, %err,
                        "failed to hard-delete blob, skipping");
                }
            }
        }

        info!(store = self.name(), removed, "compaction sweep finished");
        if let Some(checker) = usage_checker {
            if let Some(result) = checker.check(self) {
                info!(store = self.name(), violated = result.violated, "{}", result.message);
            }
        }
        Ok(removed)
    }

    fn usage(&self) -> StoreUsage {
        self.usage.snapshot()
    }

    fn operation_metrics(&self) -> OperationMetricsSnapshot {
        self.ops.snapshot()
    }
}

impl std::fmt::Debug for FileBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlobStore")
            .field("name", &self.config.name)
            .field("root", &self.root)
            .field("state", &self.lifecycle.current())
            .finish()
    }
}
