use std::io::Read;
use std::time::Duration;

use cask_types::{BlobId, BlobRef, Headers};

use crate::attributes::BlobAttributes;
use crate::blob::Blob;
use crate::cancel::CancelToken;
use crate::config::BlobStoreConfiguration;
use crate::error::StoreResult;
use crate::metrics::{OperationMetricsSnapshot, StoreUsage};
use crate::quota::QuotaService;
use crate::support::LifecycleState;

/// The polymorphic contract every storage backend implements.
///
/// All implementations must satisfy these invariants:
/// - Every operation fails fast with [`StoreError::NotStarted`] until the
///   store's lifecycle has reached the running state.
/// - `create` is atomic from the caller's perspective: on partial failure
///   no partially-readable blob remains.
/// - Blobs are created temporary and promoted to permanent exactly once;
///   promotion is idempotent.
/// - `delete` is a soft delete: it never touches content bytes. Bytes are
///   reclaimed only by `compact` (or `delete_if_temp` for blobs that were
///   never promoted).
/// - Attributes and content are never left in an inconsistent pairing.
/// - Concurrent `create`/`get`/`delete` need no external locking; writes
///   to the same id serialize inside the backend.
///
/// [`StoreError::NotStarted`]: crate::StoreError::NotStarted
pub trait BlobStore: Send + Sync {
    /// The store's unique name.
    fn name(&self) -> &str;

    /// The configuration the store was built from.
    fn configuration(&self) -> &BlobStoreConfiguration;

    /// Current lifecycle state.
    fn state(&self) -> LifecycleState;

    /// Bring the store into the running state, rebuilding usage counters.
    fn start(&self) -> StoreResult<()>;

    /// Leave the running state. Subsequent operations fail fast.
    fn stop(&self) -> StoreResult<()>;

    /// Write a new temporary blob under a caller-supplied id.
    ///
    /// Streams `content` to durable storage, computing size and hash on the
    /// way, stamps the temporary marker, and persists the sidecar. Fails
    /// with [`StoreError::IdInUse`](crate::StoreError::IdInUse) if the id
    /// already names a blob.
    fn create_with_id(
        &self,
        id: BlobId,
        content: &mut dyn Read,
        headers: Headers,
    ) -> StoreResult<Blob>;

    /// Write a new temporary blob under a fresh backend-assigned id.
    fn create(&self, content: &mut dyn Read, headers: Headers) -> StoreResult<Blob> {
        self.create_with_id(BlobId::random(), content, headers)
    }

    /// Read a blob. `Ok(None)` for unknown, hard-deleted, or soft-deleted
    /// ids; absence is not an error.
    fn get(&self, id: &BlobId) -> StoreResult<Option<Blob>>;

    /// Direct backend access that also returns soft-deleted blobs. Their
    /// bytes remain retrievable here until compaction reclaims them.
    fn get_including_deleted(&self, id: &BlobId) -> StoreResult<Option<Blob>>;

    /// Read a blob through a ref.
    ///
    /// Backends that trust a metadata mirror may use a heavy ref's cached
    /// metrics to skip a metadata fetch; the default simply forwards to
    /// [`get`](Self::get). Resolution of `blob_ref.store` to a store
    /// instance is the registry's job, not the backend's.
    fn get_by_ref(&self, blob_ref: &BlobRef) -> StoreResult<Option<Blob>> {
        self.get(&blob_ref.blob)
    }

    /// Read a blob's sidecar record, soft-deleted ones included.
    fn attributes(&self, id: &BlobId) -> StoreResult<Option<BlobAttributes>>;

    /// Soft-delete: flip the sidecar's deleted flag, recording the reason
    /// and time. Returns whether a live record existed and was
    /// transitioned. Never removes bytes.
    fn delete(&self, id: &BlobId, reason: &str) -> StoreResult<bool>;

    /// Remove bytes and sidecar together. Used by compaction and by
    /// deletion of temporary blobs.
    fn delete_hard(&self, id: &BlobId) -> StoreResult<bool>;

    /// Hard-delete `blob` only if it is still temporary and this store is
    /// its owner. Permanent blobs and blobs fetched from another store are
    /// left untouched (`false`).
    fn delete_if_temp(&self, blob: &Blob) -> StoreResult<bool>;

    /// The temporary → permanent transition.
    ///
    /// Rejects `headers` that re-declare the temporary marker. If the
    /// stored blob is already permanent the call falls back to copying the
    /// content as a new permanent blob, so a caller retrying after an
    /// unacknowledged promotion still succeeds.
    fn make_permanent(&self, blob: &Blob, headers: Headers) -> StoreResult<Blob>;

    /// Permanently remove soft-deleted and abandoned-temporary blobs older
    /// than `older_than`.
    ///
    /// Per-blob failures are logged and skipped; the sweep is cancellable
    /// at blob boundaries and idempotent on re-run. Returns the number of
    /// blobs removed. When `usage_checker` is supplied the quota status is
    /// logged after the sweep (compaction and quota stay otherwise
    /// decoupled).
    fn compact(
        &self,
        usage_checker: Option<&QuotaService>,
        older_than: Duration,
        cancel: &CancelToken,
    ) -> StoreResult<u64>;

    /// Live pre-aggregated usage counters.
    fn usage(&self) -> StoreUsage;

    /// Cumulative download/upload counters.
    fn operation_metrics(&self) -> OperationMetricsSnapshot;
}
