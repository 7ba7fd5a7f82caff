//! Foundation types for the Cask blob store.
//!
//! This crate provides the addressing and metadata types shared by every
//! storage backend. Every other cask crate depends on `cask-types`.
//!
//! # Key Types
//!
//! - [`BlobId`] — opaque unique identifier for one blob within one store
//! - [`BlobRef`] — store-qualified blob reference with the stable
//!   `store@id[@timestamp]` text encoding
//! - [`BlobMetrics`] — size / content hash / creation time snapshot
//! - [`HashAlgorithm`] — the configured content-hash algorithm
//! - [`Headers`] — caller-supplied blob headers plus the reserved names
//!   in [`headers`]

pub mod blob_ref;
pub mod error;
pub mod headers;
pub mod id;
pub mod metrics;

pub use blob_ref::BlobRef;
pub use error::AddressError;
pub use headers::Headers;
pub use id::BlobId;
pub use metrics::{BlobMetrics, HashAlgorithm};
