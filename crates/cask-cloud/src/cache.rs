//! The optional metadata mirror.
//!
//! A cloud store can keep every blob's sidecar record mirrored in a local
//! database so the metadata path never round-trips to the provider. The
//! mirror is write-through: the remote object is always written first, then
//! the cache, so a cache loss is only ever a performance regression.
//!
//! The cache is infallible by contract: an implementation that hits its
//! own storage errors logs and degrades to a miss rather than failing the
//! caller's blob operation.

use std::collections::HashMap;
use std::sync::RwLock;

use cask_store::BlobAttributes;
use cask_types::BlobId;

/// Mirror of sidecar records keyed by blob id.
pub trait MetadataCache: Send + Sync {
    /// Cached record for `id`, if mirrored.
    fn get(&self, id: &BlobId) -> Option<BlobAttributes>;

    /// Mirror a record after a successful remote write.
    fn put(&self, id: &BlobId, attrs: &BlobAttributes);

    /// Drop a record after a hard delete.
    fn remove(&self, id: &BlobId);
}

/// HashMap-backed [`MetadataCache`] for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryMetadataCache {
    entries: RwLock<HashMap<BlobId, BlobAttributes>>,
}

impl MemoryMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mirrored records.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }
}

impl MetadataCache for MemoryMetadataCache {
    fn get(&self, id: &BlobId) -> Option<BlobAttributes> {
        self.entries.read().expect("lock poisoned").get(id).cloned()
    }

    fn put(&self, id: &BlobId, attrs: &BlobAttributes) {
        self.entries
            .write()
            .expect("lock poisoned")
            .insert(id.clone(), attrs.clone());
    }

    fn remove(&self, id: &BlobId) {
        self.entries.write().expect("lock poisoned").remove(id);
    }
}
