//! Cloud object-storage backend for the Cask blob store.
//!
//! Implements the [`BlobStore`](cask_store::BlobStore) contract over two
//! seams:
//!
//! - [`ObjectClient`] — the provider transport (put/get/head/delete/list
//!   with a configured per-call timeout). Connection failures carry the
//!   provider's message verbatim and are never retried in this layer.
//! - [`MetadataCache`] — an optional database mirror of the sidecar
//!   records, write-through on every mutation, letting the metadata path
//!   skip the provider entirely.
//!
//! With the mirror enabled, a heavy [`BlobRef`](cask_types::BlobRef) is
//! served without any provider round-trip at all; the cached metrics are a
//! read-path optimization only and never feed correctness-sensitive
//! decisions. Promotion attaches the provider's ETag / Last-Modified to the
//! headers, but only while the stored object is still temporary.

pub mod cache;
pub mod client;
pub mod store;
pub mod verify;

pub use cache::{MemoryMetadataCache, MetadataCache};
pub use client::{InMemoryObjectClient, ObjectClient, RemoteMetadata, RemoteObject};
pub use store::CloudBlobStore;
pub use verify::verify_connection;
