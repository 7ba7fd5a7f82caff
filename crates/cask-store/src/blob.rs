use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use cask_types::{headers, AddressError, BlobId, BlobMetrics, BlobRef, Headers};

use crate::error::StoreResult;

/// Opens a blob's content on demand. Cloud backends implement this to defer
/// the provider fetch until the caller actually reads.
pub trait ContentOpener: Send + Sync {
    fn open(&self) -> StoreResult<Box<dyn Read + Send>>;
}

/// Where a blob's bytes live.
#[derive(Clone)]
pub enum BlobContent {
    /// Content held in memory.
    Bytes(Bytes),
    /// Content in a local file, opened on read.
    File(PathBuf),
    /// Content fetched on first read (cloud backends).
    Deferred(Arc<dyn ContentOpener>),
}

impl BlobContent {
    /// Open a fresh reader over the content.
    pub fn open(&self) -> StoreResult<Box<dyn Read + Send>> {
        match self {
            Self::Bytes(bytes) => Ok(Box::new(std::io::Cursor::new(bytes.clone()))),
            Self::File(path) => Ok(Box::new(std::fs::File::open(path)?)),
            Self::Deferred(opener) => opener.open(),
        }
    }
}

impl fmt::Debug for BlobContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::File(p) => f.debug_tuple("File").field(p).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// One stored binary object: id, headers, metrics, and readable content.
///
/// A blob is owned exclusively by the backend that created it until deleted;
/// `origin_store` records that owner so a blob handed around by reference is
/// never deleted through a different store instance.
#[derive(Clone, Debug)]
pub struct Blob {
    /// The blob's id within its store.
    pub id: BlobId,
    /// Name of the store that created the blob.
    pub origin_store: String,
    /// Caller headers plus system-reserved entries.
    pub headers: Headers,
    /// Size / hash / creation-time snapshot.
    pub metrics: BlobMetrics,
    content: BlobContent,
}

impl Blob {
    pub fn new(
        id: BlobId,
        origin_store: impl Into<String>,
        headers: Headers,
        metrics: BlobMetrics,
        content: BlobContent,
    ) -> Self {
        Self {
            id,
            origin_store: origin_store.into(),
            headers,
            metrics,
            content,
        }
    }

    /// The content location.
    pub fn content(&self) -> &BlobContent {
        &self.content
    }

    /// Open a fresh reader over the content.
    pub fn open(&self) -> StoreResult<Box<dyn Read + Send>> {
        self.content.open()
    }

    /// Read the whole content into memory. Intended for small payloads and
    /// tests; large artifacts should stream through [`open`](Self::open).
    pub fn read_all(&self) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.open()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Returns `true` while the blob still carries the temporary marker.
    pub fn is_temporary(&self) -> bool {
        headers::is_temporary(&self.headers)
    }

    /// A light ref naming this blob.
    pub fn to_light_ref(&self) -> Result<BlobRef, AddressError> {
        BlobRef::light(self.origin_store.clone(), self.id.clone())
    }

    /// A heavy ref carrying this blob's metrics, snapshotted at `at`.
    pub fn to_heavy_ref(&self, at: DateTime<Utc>) -> Result<BlobRef, AddressError> {
        BlobRef::heavy(
            self.origin_store.clone(),
            self.id.clone(),
            self.metrics.clone(),
            at,
        )
    }
}
