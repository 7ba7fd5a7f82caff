//! Maintenance tasks for Cask blob stores.
//!
//! The centerpiece is the compaction (garbage collection) task: soft
//! deletes are O(1) flag flips, and this crate's sweep is the only thing
//! that ever reclaims bytes. Around it sit the safety nets a deployment
//! needs:
//!
//! - [`TaskRegistry`] + the move-conflict guard — never compact a store a
//!   running "move store" task is migrating.
//! - [`ResourceLocks`] — leased, advisory cluster locks so an operation
//!   runs on exactly one node; the default [`LocalResourceLocks`] covers
//!   single-node deployments.
//! - [`WorkerPool`] — a fixed-size pool with a bounded queue and explicit
//!   drain-on-shutdown, running one job per store.
//!
//! Cancellation is cooperative throughout: the shared
//! [`CancelToken`](cask_store::CancelToken) is checked between stores and,
//! inside each backend, between blobs.

pub mod compact;
pub mod conflict;
pub mod coordination;
pub mod error;
pub mod pool;

pub use compact::{
    CompactionConfig, CompactionReport, CompactionTask, StoreOutcome, StoreReport, StoreSelector,
};
pub use conflict::{TaskDescriptor, TaskRegistry, TaskState, MOVE_TYPE_ID};
pub use coordination::{
    acquire_scoped, LocalResourceLocks, LockLease, ResourceLockGuard, ResourceLocks,
};
pub use error::{TaskError, TaskResult};
pub use pool::WorkerPool;
