//! Storage-quota evaluation.
//!
//! A quota is configured per store and checked against the store's live
//! usage counters, never against per-blob caches and never by scanning the
//! store, so the check is cheap enough to run on every write. A violation
//! is advisory: it is surfaced to administrators, and whether writes are
//! actually blocked is a policy decision made by the calling layer.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::metrics::StoreUsage;
use crate::registry::BlobStoreRegistry;
use crate::traits::BlobStore;

/// What a quota limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaKind {
    /// Limit on total stored bytes.
    SpaceUsed,
    /// Limit on the number of stored blobs.
    BlobCount,
}

/// Configured quota for one store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaConfig {
    pub kind: QuotaKind,
    pub limit: u64,
}

/// Outcome of one quota check. Computed fresh on every call, never
/// persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuotaResult {
    /// `true` once configured usage exceeds the configured limit.
    pub violated: bool,
    /// The store the check ran against.
    pub store_name: String,
    /// Human-readable summary for administrators.
    pub message: String,
}

/// Evaluates store quotas from live usage counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuotaService;

impl QuotaService {
    pub fn new() -> Self {
        Self
    }

    /// Check one store.
    ///
    /// Returns `None` when the store has no quota configured, which is not
    /// the same as "within limit"; callers must distinguish the two. A
    /// malformed quota configuration is logged and reported as absent
    /// rather than failing the caller's operation.
    pub fn check(&self, store: &dyn BlobStore) -> Option<QuotaResult> {
        let config = match store.configuration().quota() {
            Ok(config) => config?,
            Err(err) => {
                warn!(store = store.name(), %err, "unreadable quota configuration");
                return None;
            }
        };
        Some(evaluate(store.name(), config, store.usage()))
    }

    /// Administrative query: check a store by name.
    ///
    /// `None` when the store does not exist or has no quota configured.
    pub fn check_store(&self, registry: &BlobStoreRegistry, name: &str) -> Option<QuotaResult> {
        let store = registry.get(name)?;
        self.check(store.as_ref())
    }
}

fn evaluate(store_name: &str, config: QuotaConfig, usage: StoreUsage) -> QuotaResult {
    let (used, what) = match config.kind {
        QuotaKind::SpaceUsed => (usage.total_bytes, "bytes"),
        QuotaKind::BlobCount => (usage.blob_count, "blobs"),
    };
    let violated = used > config.limit;
    let message = if violated {
        format!(
            "blob store {store_name} is using {used} {what} of its {} {what} quota",
            config.limit
        )
    } else {
        format!(
            "blob store {store_name} is within its quota: {used} of {} {what}",
            config.limit
        )
    };
    QuotaResult {
        violated,
        store_name: store_name.to_string(),
        message,
    }
}
