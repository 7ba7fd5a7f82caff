//! Content-addressable blob storage for the Cask repository manager.
//!
//! This crate holds the storage core: the polymorphic [`BlobStore`]
//! contract, the durable sidecar attributes record, the local-filesystem
//! and in-memory backends, per-store metrics, and quota evaluation. Cloud
//! backends live in `cask-cloud` and implement the same contract.
//!
//! # Blob Lifecycle
//!
//! ```text
//! create ──► temporary ──make_permanent──► permanent ──delete──► soft-deleted
//!                │                                                    │
//!                └──delete_if_temp──► hard-deleted ◄────compact───────┘
//! ```
//!
//! # Design Rules
//!
//! 1. Blobs are created temporary and promoted exactly once; promotion is
//!    idempotent (a retry falls back to copy-as-new-permanent).
//! 2. Deletes are soft and O(1): bytes are reclaimed only by the
//!    asynchronous compaction sweep.
//! 3. Attributes and content are never left in an inconsistent pairing.
//! 4. Every operation is guarded by the store lifecycle: not started ⇒
//!    fail fast.
//! 5. Quota reads pre-aggregated counters, never a store scan and never a
//!    heavy-ref cache.
//! 6. All I/O errors are propagated, never silently ignored.

pub mod attributes;
pub mod blob;
pub mod cancel;
pub mod config;
pub mod error;
pub mod file;
pub mod memory;
pub mod metrics;
pub mod quota;
pub mod registry;
pub mod support;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use attributes::BlobAttributes;
pub use blob::{Blob, BlobContent, ContentOpener};
pub use cancel::CancelToken;
pub use config::{BlobStoreConfiguration, StoreCatalog};
pub use error::{StoreError, StoreResult};
pub use file::FileBlobStore;
pub use memory::InMemoryBlobStore;
pub use metrics::{OperationMetrics, OperationMetricsSnapshot, StoreUsage, UsageCounters};
pub use quota::{QuotaConfig, QuotaKind, QuotaResult, QuotaService};
pub use registry::BlobStoreRegistry;
pub use support::{Lifecycle, LifecycleState};
pub use traits::BlobStore;
