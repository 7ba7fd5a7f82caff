//! Cloud object-storage backend.
//!
//! Content and sidecar live as two provider objects per blob:
//!
//! ```text
//! <prefix>/content/<id>.bytes
//! <prefix>/content/<id>.properties
//! ```
//!
//! The metadata path can be served from an optional [`MetadataCache`]
//! mirror instead of the provider, and a heavy ref can skip the metadata
//! read entirely (see [`CloudBlobStore::get_by_ref`]). Safety-relevant
//! checks (is the stored object still temporary, does it still exist)
//! always read the provider, never the mirror.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use cask_store::support::{
    compaction_threshold, copy_and_hash, eligible_for_compaction, ensure_no_temporary_header,
    now_millis, promote_headers, IdLocks, Lifecycle, LifecycleState,
};
use cask_store::{
    config::CLOUD_SECTION, Blob, BlobAttributes, BlobContent, BlobStore, BlobStoreConfiguration,
    CancelToken, ContentOpener, OperationMetrics, OperationMetricsSnapshot, QuotaService,
    StoreError, StoreResult, StoreUsage, UsageCounters,
};
use cask_types::{
    headers::{EXTERNAL_ETAG_HEADER, EXTERNAL_LAST_MODIFIED_HEADER, TEMPORARY_HEADER},
    BlobId, BlobMetrics, BlobRef, HashAlgorithm, Headers,
};

use crate::cache::MetadataCache;
use crate::client::{ObjectClient, RemoteMetadata};

const BYTES_SUFFIX: &str = ".bytes";
const PROPERTIES_SUFFIX: &str = ".properties";

/// Blob store backed by cloud object storage.
pub struct CloudBlobStore {
    config: BlobStoreConfiguration,
    client: Arc<dyn ObjectClient>,
    cache: Option<Arc<dyn MetadataCache>>,
    cache_flag: bool,
    prefix: String,
    algorithm: HashAlgorithm,
    lifecycle: Lifecycle,
    usage: UsageCounters,
    ops: OperationMetrics,
    id_locks: IdLocks,
}

impl CloudBlobStore {
    /// Build a store over a provider client and an optional metadata
    /// mirror. The `cloud.metadata_cache = "true"` attribute requires a
    /// mirror instance.
    pub fn new(
        config: BlobStoreConfiguration,
        client: Arc<dyn ObjectClient>,
        cache: Option<Arc<dyn MetadataCache>>,
    ) -> StoreResult<Self> {
        config.validate()?;
        if config.store_type != "cloud" {
            return Err(StoreError::Config(format!(
                "store {:?} is of type {:?}, not \"cloud\"",
                config.name, config.store_type
            )));
        }
        let cache_flag = config.attribute(CLOUD_SECTION, "metadata_cache") == Some("true");
        if cache_flag && cache.is_none() {
            return Err(StoreError::Config(format!(
                "store {:?} enables the metadata cache but no cache was supplied",
                config.name
            )));
        }
        let prefix = config
            .attribute(CLOUD_SECTION, "bucket_prefix")
            .unwrap_or(&config.name)
            .to_string();
        let algorithm = config.hash_algorithm(CLOUD_SECTION)?;
        Ok(Self {
            config,
            client,
            cache,
            cache_flag,
            prefix,
            algorithm,
            lifecycle: Lifecycle::new(),
            usage: UsageCounters::new(),
            ops: OperationMetrics::new(),
            id_locks: IdLocks::default(),
        })
    }

    fn content_prefix(&self) -> String {
        format!("{}/content/", self.prefix)
    }

    fn bytes_key(&self, id: &BlobId) -> String {
        format!("{}{id}{BYTES_SUFFIX}", self.content_prefix())
    }

    fn properties_key(&self, id: &BlobId) -> String {
        format!("{}{id}{PROPERTIES_SUFFIX}", self.content_prefix())
    }

    fn shortcut_enabled(&self) -> bool {
        self.cache_flag && self.cache.is_some()
    }

    /// Metadata read preferring the mirror.
    fn read_attributes(&self, id: &BlobId) -> StoreResult<Option<BlobAttributes>> {
        if let Some(cache) = &self.cache {
            if let Some(attrs) = cache.get(id) {
                return Ok(Some(attrs));
            }
        }
        self.read_attributes_remote(id)
    }

    /// Authoritative metadata read straight from the provider. Used by
    /// every check that gates a destructive or once-only transition.
    fn read_attributes_remote(&self, id: &BlobId) -> StoreResult<Option<BlobAttributes>> {
        let Some(object) = self.client.get_object(&self.properties_key(id))? else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&object.data)
            .map_err(|_| StoreError::Attributes("sidecar is not UTF-8".to_string()))?;
        let attrs = BlobAttributes::parse_properties(text)?;
        if let Some(cache) = &self.cache {
            cache.put(id, &attrs);
        }
        Ok(Some(attrs))
    }

    /// Write the sidecar remote-first, then mirror it.
    fn write_attributes(&self, id: &BlobId, attrs: &BlobAttributes) -> StoreResult<()> {
        self.client
            .put_object(&self.properties_key(id), attrs.to_properties().as_bytes())?;
        if let Some(cache) = &self.cache {
            cache.put(id, attrs);
        }
        Ok(())
    }

    fn deferred_blob(&self, id: BlobId, attrs: BlobAttributes) -> Blob {
        let opener = CloudContent {
            client: Arc::clone(&self.client),
            key: self.bytes_key(&id),
            id: id.clone(),
        };
        Blob::new(
            id,
            self.config.name.clone(),
            attrs.headers,
            attrs.metrics,
            BlobContent::Deferred(Arc::new(opener)),
        )
    }

    fn get_impl(&self, id: &BlobId, include_deleted: bool) -> StoreResult<Option<Blob>> {
        self.lifecycle.ensure_started(self.name())?;
        let Some(attrs) = self.read_attributes(id)? else {
            return Ok(None);
        };
        if attrs.deleted && !include_deleted {
            return Ok(None);
        }
        self.ops.record_download(attrs.metrics.size);
        Ok(Some(self.deferred_blob(id.clone(), attrs)))
    }

    /// Remove sidecar then bytes. Caller holds the id lock.
    fn hard_delete_locked(&self, id: &BlobId) -> StoreResult<bool> {
        let Some(attrs) = self.read_attributes_remote(id)? else {
            return Ok(false);
        };
        self.client.delete_object(&self.properties_key(id))?;
        self.client.delete_object(&self.bytes_key(id))?;
        if let Some(cache) = &self.cache {
            cache.remove(id);
        }
        self.usage.remove_blob(attrs.metrics.size);
        debug!(store = self.name(), id = %id, "hard-deleted blob");
        Ok(true)
    }

    /// Overlay the provider-reported ETag / Last-Modified onto `headers`.
    fn attach_external(headers: &mut Headers, meta: &RemoteMetadata) {
        if let Some(etag) = &meta.etag {
            headers.insert(EXTERNAL_ETAG_HEADER.to_string(), etag.clone());
        }
        if let Some(last_modified) = meta.last_modified {
            headers.insert(
                EXTERNAL_LAST_MODIFIED_HEADER.to_string(),
                last_modified.to_rfc3339(),
            );
        }
    }
}

struct CloudContent {
    client: Arc<dyn ObjectClient>,
    key: String,
    id: BlobId,
}

impl ContentOpener for CloudContent {
    fn open(&self) -> StoreResult<Box<dyn Read + Send>> {
        match self.client.get_object(&self.key)? {
            Some(object) => Ok(Box::new(std::io::Cursor::new(object.data))),
            None => Err(StoreError::Corrupt {
                id: self.id.clone(),
                reason: "content object missing".to_string(),
            }),
        }
    }
}

impl BlobStore for CloudBlobStore {
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
        // One listing rebuilds the usage counters; a provider that is
        // unreachable fails the start, it does not start degraded.
        let mut count = 0u64;
        let mut bytes = 0u64;
        for key in self.client.list_keys(&self.content_prefix())? {
            if !key.ends_with(PROPERTIES_SUFFIX) {
                continue;
            }
            let Some(object) = self.client.get_object(&key)? else {
                continue;
            };
            match std::str::from_utf8(&object.data)
                .map_err(|_| StoreError::Attributes("sidecar is not UTF-8".to_string()))
                .and_then(BlobAttributes::parse_properties)
            {
                Ok(attrs) => {
                    count += 1;
                    bytes += attrs.metrics.size;
                }
                Err(err) => {
                    warn!(store = self.name(), key = %key, %err,
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

        if self.client.head_object(&self.properties_key(&id))?.is_some() {
            return Err(StoreError::IdInUse(id));
        }

        let mut buf = Vec::new();
        let (size, hash) = copy_and_hash(content, &mut buf, self.algorithm)?;
        self.client.put_object(&self.bytes_key(&id), &buf)?;

        headers.insert(TEMPORARY_HEADER.to_string(), "true".to_string());
        let metrics = BlobMetrics::new(size, hash, self.algorithm, now_millis());
        let attrs = BlobAttributes::new(headers, metrics);
        if let Err(err) = self.write_attributes(&id, &attrs) {
            // No readable blob may remain after a failed create.
            let _ = self.client.delete_object(&self.bytes_key(&id));
            return Err(err);
        }

        self.usage.add_blob(size);
        self.ops.record_upload(size);
        debug!(store = self.name(), id = %id, size, "created temporary blob");
        Ok(Blob::new(
            id,
            self.config.name.clone(),
            attrs.headers,
            attrs.metrics,
            BlobContent::Bytes(Bytes::from(buf)),
        ))
    }

    fn get(&self, id: &BlobId) -> StoreResult<Option<Blob>> {
        self.get_impl(id, false)
    }

    fn get_including_deleted(&self, id: &BlobId) -> StoreResult<Option<Blob>> {
        self.get_impl(id, true)
    }

    /// Heavy-ref fast path: with the metadata cache enabled, a heavy ref
    /// for this store is served as a blob shell refreshed from the ref's
    /// cached metrics, with no provider round-trip at all. The shell carries no
    /// headers; callers that need headers (or authoritative metrics) go
    /// through [`get`](BlobStore::get).
    fn get_by_ref(&self, blob_ref: &BlobRef) -> StoreResult<Option<Blob>> {
        self.lifecycle.ensure_started(self.name())?;
        if self.shortcut_enabled() && blob_ref.store == self.config.name {
            if let Some(metrics) = &blob_ref.metrics {
                self.ops.record_download(metrics.size);
                return Ok(Some(self.deferred_blob(
                    blob_ref.blob.clone(),
                    BlobAttributes::new(Headers::new(), metrics.clone()),
                )));
            }
        }
        self.get(&blob_ref.blob)
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
        // Cloud stores may share a bucket; never delete through a store
        // that does not own the blob.
        if blob.origin_store != self.config.name {
            return Ok(false);
        }
        let _guard = self.id_locks.lock(&blob.id);
        match self.read_attributes_remote(&blob.id)? {
            Some(attrs) if attrs.is_temporary() => self.hard_delete_locked(&blob.id),
            _ => Ok(false),
        }
    }

    fn make_permanent(&self, blob: &Blob, headers: Headers) -> StoreResult<Blob> {
        self.lifecycle.ensure_started(self.name())?;
        ensure_no_temporary_header(&headers)?;

        let stored = {
            let _guard = self.id_locks.lock(&blob.id);
            let Some(mut attrs) = self.read_attributes_remote(&blob.id)? else {
                return Err(StoreError::NotFound(blob.id.clone()));
            };
            if attrs.is_temporary() {
                // External metadata is attached only while the stored
                // object still carries the temporary marker, so a blob
                // another process already promoted is never overwritten.
                let mut base = attrs.headers.clone();
                if let Some(meta) = self.client.head_object(&self.bytes_key(&blob.id))? {
                    Self::attach_external(&mut base, &meta);
                }
                attrs.headers = promote_headers(&base, &headers);
                self.write_attributes(&blob.id, &attrs)?;
                debug!(store = self.name(), id = %blob.id, "promoted blob to permanent");
                return Ok(self.deferred_blob(blob.id.clone(), attrs));
            }
            attrs
        };

        // Already permanent: a retry after an unacknowledged promotion.
        // Copy the content as a fresh permanent blob.
        info!(store = self.name(), id = %blob.id,
            "promotion of a permanent blob, copying as new");
        let Some(object) = self.client.get_object(&self.bytes_key(&blob.id))? else {
            return Err(StoreError::Corrupt {
                id: blob.id.clone(),
                reason: "content object missing".to_string(),
            });
        };
        let id = BlobId::random();
        let meta = self.client.put_object(&self.bytes_key(&id), &object.data)?;
        let mut merged = promote_headers(&stored.headers, &headers);
        Self::attach_external(&mut merged, &meta);
        let metrics = BlobMetrics::new(
            stored.metrics.size,
            stored.metrics.hash.clone(),
            stored.metrics.algorithm,
            now_millis(),
        );
        let attrs = BlobAttributes::new(merged, metrics);
        self.write_attributes(&id, &attrs)?;
        self.usage.add_blob(attrs.metrics.size);
        self.ops.record_upload(attrs.metrics.size);
        Ok(self.deferred_blob(id, attrs))
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
        for key in self.client.list_keys(&self.content_prefix())? {
            if cancel.is_canceled() {
                info!(store = self.name(), removed, "compaction canceled");
                break;
            }
            let Some(stem) = key
                .rsplit('/')
                .next()
                .and_then(|f| f.strip_suffix(PROPERTIES_SUFFIX))
            else {
                continue;
            };
            let Ok(id) = BlobId::parse(stem) else {
                continue;
            };
            let attrs = match self.read_attributes_remote(&id) {
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

impl std::fmt::Debug for CloudBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudBlobStore")
            .field("name", &self.config.name)
            .field("prefix", &self.prefix)
            .field("cached", &self.cache.is_some())
            .field("state", &self.lifecycle.current())
            .finish()
    }
}
