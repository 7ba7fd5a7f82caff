use std::collections::HashMap;
use std::io::Read;
use std::sync::RwLock;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use cask_types::{BlobId, BlobMetrics, Headers};

use crate::attributes::BlobAttributes;
use crate::blob::{Blob, BlobContent};
use crate::cancel::CancelToken;
use crate::config::BlobStoreConfiguration;
use crate::error::{StoreError, StoreResult};
use crate::metrics::{OperationMetrics, OperationMetricsSnapshot, StoreUsage, UsageCounters};
use crate::quota::QuotaService;
use crate::support::{
    compaction_threshold, copy_and_hash, eligible_for_compaction, ensure_no_temporary_header,
    now_millis, promote_headers, Lifecycle, LifecycleState,
};
use crate::traits::BlobStore;

struct Record {
    attrs: BlobAttributes,
    content: Bytes,
}

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. Implements the full [`BlobStore`]
/// contract (lifecycle guard, two-phase blob lifecycle, soft delete,
/// compaction) with all state behind one `RwLock`.
pub struct InMemoryBlobStore {
    config: BlobStoreConfiguration,
    algorithm: cask_types::HashAlgorithm,
    lifecycle: Lifecycle,
    usage: UsageCounters,
    ops: OperationMetrics,
    records: RwLock<HashMap<BlobId, Record>>,
}

impl InMemoryBlobStore {
    /// A started store with an empty configuration, ready to use.
    pub fn new(name: impl Into<String>) -> Self {
        let store = Self::from_configuration(BlobStoreConfiguration::new(name, "memory"));
        store.lifecycle.start();
        store
    }

    /// Build from a configuration without starting. A malformed
    /// `memory.hash_algorithm` attribute falls back to the default.
    pub fn from_configuration(config: BlobStoreConfiguration) -> Self {
        let algorithm = config.hash_algorithm("memory").unwrap_or_default();
        Self {
            config,
            algorithm,
            lifecycle: Lifecycle::new(),
            usage: UsageCounters::new(),
            ops: OperationMetrics::new(),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records currently stored, soft-deleted ones included.
    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().expect("lock poisoned").is_empty()
    }

    fn blob_from(&self, id: BlobId, attrs: BlobAttributes, content: Bytes) -> Blob {
        Blob::new(
            id,
            self.config.name.clone(),
            attrs.headers,
            attrs.metrics,
            BlobContent::Bytes(content),
        )
    }

    fn get_impl(&self, id: &BlobId, include_deleted: bool) -> StoreResult<Option<Blob>> {
        self.lifecycle.ensure_started(self.name())?;
        let map = self.records.read().expect("lock poisoned");
        let Some(record) = map.get(id) else {
            return Ok(None);
        };
        if record.attrs.deleted && !include_deleted {
            return Ok(None);
        }
        let attrs = record.attrs.clone();
        let content = record.content.clone();
        drop(map);
        self.ops.record_download(attrs.metrics.size);
        Ok(Some(self.blob_from(id.clone(), attrs, content)))
    }

    fn remove_record(&self, id: &BlobId) -> bool {
        let mut map = self.records.write().expect("lock poisoned");
        match map.remove(id) {
            Some(record) => {
                self.usage.remove_blob(record.attrs.metrics.size);
                debug!(store = self.name(), id = %id, "hard-deleted blob");
                true
            }
            None => false,
        }
    }
}

impl BlobStore for InMemoryBlobStore {
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
        let map = self.records.read().expect("lock poisoned");
        let count = map.len() as u64;
        let bytes = map.values().map(|r| r.attrs.metrics.size).sum();
        drop(map);
        self.usage.set(count, bytes);
        self.lifecycle.start();
        Ok(())
    }

    fn stop(&self) -> StoreResult<()> {
        self.lifecycle.stop();
        Ok(())
    }

    fn create_with_id(
        &self,
        id: BlobId,
        content: &mut dyn Read,
        mut headers: Headers,
    ) -> StoreResult<Blob> {
        self.lifecycle.ensure_started(self.name())?;
        let mut buf = Vec::new();
        let (size, hash) = copy_and_hash(content, &mut buf, self.algorithm)?;
        headers.insert(
            cask_types::headers::TEMPORARY_HEADER.to_string(),
            "true".to_string(),
        );
        let metrics = BlobMetrics::new(size, hash, self.algorithm, now_millis());
        let attrs = BlobAttributes::new(headers, metrics);
        let content = Bytes::from(buf);

        let mut map = self.records.write().expect("lock poisoned");
        if map.contains_key(&id) {
            return Err(StoreError::IdInUse(id));
        }
        map.insert(
            id.clone(),
            Record {
                attrs: attrs.clone(),
                content: content.clone(),
            },
        );
        drop(map);

        self.usage.add_blob(size);
        self.ops.record_upload(size);
        Ok(self.blob_from(id, attrs, content))
    }

    fn get(&self, id: &BlobId) -> StoreResult<Option<Blob>> {
        self.get_impl(id, false)
    }

    fn get_including_deleted(&self, id: &BlobId) -> StoreResult<Option<Blob>> {
        self.get_impl(id, true)
    }

    fn attributes(&self, id: &BlobId) -> StoreResult<Option<BlobAttributes>> {
        self.lifecycle.ensure_started(self.name())?;
        let map = self.records.read().expect("lock poisoned");
        Ok(map.get(id).map(|r| r.attrs.clone()))
    }

    fn delete(&self, id: &BlobId, reason: &str) -> StoreResult<bool> {
        self.lifecycle.ensure_started(self.name())?;
        let mut map = self.records.write().expect("lock poisoned");
        let Some(record) = map.get_mut(id) else {
            return Ok(false);
        };
        if record.attrs.deleted {
            return Ok(false);
        }
        record.attrs.mark_deleted(reason, now_millis());
        debug!(store = self.name(), id = %id, reason, "soft-deleted blob");
        Ok(true)
    }

    fn delete_hard(&self, id: &BlobId) -> StoreResult<bool> {
        self.lifecycle.ensure_started(self.name())?;
        Ok(self.remove_record(id))
    }

    fn delete_if_temp(&self, blob: &Blob) -> StoreResult<bool> {
        self.lifecycle.ensure_started(self.name())?;
        if blob.origin_store != self.config.name {
            return Ok(false);
        }
        let mut map = self.records.write().expect("lock poisoned");
        match map.get(&blob.id) {
            Some(record) if record.attrs.is_temporary() => {
                let record = map.remove(&blob.id).expect("record just observed");
                self.usage.remove_blob(record.attrs.metrics.size);
                debug!(store = self.name(), id = %blob.id, "hard-deleted temporary blob");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn make_permanent(&self, blob: &Blob, headers: Headers) -> StoreResult<Blob> {
        self.lifecycle.ensure_started(self.name())?;
        ensure_no_temporary_header(&headers)?;

        let mut map = self.records.write().expect("lock poisoned");
        let Some(record) = map.get_mut(&blob.id) else {
            return Err(StoreError::NotFound(blob.id.clone()));
        };
        if record.attrs.is_temporary() {
            record.attrs.headers = promote_headers(&record.attrs.headers, &headers);
            let attrs = record.attrs.clone();
            let content = record.content.clone();
            drop(map);
            debug!(store = self.name(), id = %blob.id, "promoted blob to permanent");
            return Ok(self.blob_from(blob.id.clone(), attrs, content));
        }

        // Already permanent: copy as a fresh permanent blob so a promotion
        // retry still succeeds.
        let content = record.content.clone();
        let seed = promote_headers(&record.attrs.headers, &headers);
        let size = record.attrs.metrics.size;
        let metrics = BlobMetrics::new(
            size,
            record.attrs.metrics.hash.clone(),
            record.attrs.metrics.algorithm,
            now_millis(),
        );
        let id = BlobId::random();
        let attrs = BlobAttributes::new(seed, metrics);
        map.insert(
            id.clone(),
            Record {
                attrs: attrs.clone(),
                content: content.clone(),
            },
        );
        drop(map);
        self.usage.add_blob(size);
        self.ops.record_upload(size);
        info!(store = self.name(), id = %blob.id, copy = %id,
            "promotion of a permanent blob, copied as new");
        Ok(self.blob_from(id, attrs, content))
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

        let candidates: Vec<BlobId> = {
            let map = self.records.read().expect("lock poisoned");
            map.iter()
                .filter(|(_, r)| eligible_for_compaction(&r.attrs, threshold))
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut removed = 0u64;
        for id in candidates {
            if cancel.is_canceled() {
                info!(store = self.name(), removed, "compaction canceled");
                break;
            }
            // Re-check under the write lock: the blob may have been
            // promoted since the snapshot was taken.
            let mut map = self.records.write().expect("lock poisoned");
            let still_eligible = map
                .get(&id)
                .map(|r| eligible_for_compaction(&r.attrs, threshold))
                .unwrap_or(false);
            if still_eligible {
                let record = map.remove(&id).expect("record just observed");
                drop(map);
                self.usage.remove_blob(record.attrs.metrics.size);
                removed += 1;
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

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("name", &self.config.name)
            .field("record_count", &self.len())
            .finish()
    }
}
