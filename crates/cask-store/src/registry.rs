use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use cask_types::BlobRef;

use crate::blob::Blob;
use crate::config::StoreCatalog;
use crate::error::{StoreError, StoreResult};
use crate::file::FileBlobStore;
use crate::memory::InMemoryBlobStore;
use crate::traits::BlobStore;

/// The process-wide map of stores, keyed by name.
///
/// Read-mostly: populated at startup, appended to when a store is created,
/// and iterated copy-on-read so readers never observe a mutation in
/// progress. This is the only shared structure between stores; everything
/// else (metrics, locks, configuration) is owned per instance.
#[derive(Default)]
pub struct BlobStoreRegistry {
    stores: RwLock<BTreeMap<String, Arc<dyn BlobStore>>>,
}

impl BlobStoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a store. Rejects duplicate names.
    pub fn register(&self, store: Arc<dyn BlobStore>) -> StoreResult<()> {
        let name = store.name().to_string();
        let mut map = self.stores.write().expect("lock poisoned");
        if map.contains_key(&name) {
            return Err(StoreError::Config(format!(
                "store {name:?} is already registered"
            )));
        }
        info!(store = %name, "registered blob store");
        map.insert(name, store);
        Ok(())
    }

    /// Look up a store by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn BlobStore>> {
        self.stores
            .read()
            .expect("lock poisoned")
            .get(name)
            .cloned()
    }

    /// Snapshot of every registered store, sorted by name.
    pub fn all(&self) -> Vec<Arc<dyn BlobStore>> {
        self.stores
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot of registered store names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.stores
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Resolve a ref: find its store, then read the blob through it.
    ///
    /// `Ok(None)` when the store is unknown or the blob is absent.
    pub fn resolve(&self, blob_ref: &BlobRef) -> StoreResult<Option<Blob>> {
        match self.get(&blob_ref.store) {
            Some(store) => store.get_by_ref(blob_ref),
            None => Ok(None),
        }
    }

    /// Build and start a registry from a store catalog.
    ///
    /// Handles `file` and `memory` entries; `cloud` stores need a provider
    /// client and are constructed programmatically, so a catalog naming one
    /// is rejected here.
    pub fn from_catalog(catalog: &StoreCatalog) -> StoreResult<Self> {
        let registry = Self::new();
        for config in &catalog.stores {
            let store: Arc<dyn BlobStore> = match config.store_type.as_str() {
                "file" => {
                    let store = FileBlobStore::new(config.clone())?;
                    store.start()?;
                    Arc::new(store)
                }
                "memory" => {
                    let store = InMemoryBlobStore::from_configuration(config.clone());
                    store.start()?;
                    Arc::new(store)
                }
                other => {
                    return Err(StoreError::Config(format!(
                        "store {:?}: type {other:?} cannot be built from a catalog",
                        config.name
                    )))
                }
            };
            registry.register(store)?;
        }
        Ok(registry)
    }
}

impl std::fmt::Debug for BlobStoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStoreRegistry")
            .field("stores", &self.names())
            .finish()
    }
}
