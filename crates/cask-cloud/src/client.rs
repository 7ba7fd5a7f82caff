//! The provider transport seam.
//!
//! [`ObjectClient`] is the only thing a cloud backend knows about the
//! provider. Implementations wrap an SDK or HTTP client; every call must be
//! bounded by the client's configured timeout, and any retry policy lives
//! in the transport, configured independently; the store itself never
//! retries. Connection failures surface as
//! [`StoreError::Connection`](cask_store::StoreError::Connection) carrying
//! the provider's message verbatim.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use cask_store::{StoreError, StoreResult};

/// Metadata the provider reports for one stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteMetadata {
    /// Provider ETag, if reported.
    pub etag: Option<String>,
    /// Provider Last-Modified, if reported.
    pub last_modified: Option<DateTime<Utc>>,
    /// Object size in bytes.
    pub size: u64,
}

/// A fetched remote object: payload plus provider metadata.
#[derive(Clone, Debug)]
pub struct RemoteObject {
    pub data: Bytes,
    pub metadata: RemoteMetadata,
}

/// Synchronous contract against the cloud provider.
pub trait ObjectClient: Send + Sync {
    /// Write an object, returning the metadata of the stored result.
    fn put_object(&self, key: &str, data: &[u8]) -> StoreResult<RemoteMetadata>;

    /// Fetch an object. `Ok(None)` when the key does not exist.
    fn get_object(&self, key: &str) -> StoreResult<Option<RemoteObject>>;

    /// Fetch only an object's metadata. `Ok(None)` when absent.
    fn head_object(&self, key: &str) -> StoreResult<Option<RemoteMetadata>>;

    /// Delete an object. Returns whether it existed.
    fn delete_object(&self, key: &str) -> StoreResult<bool>;

    /// List every key starting with `prefix`.
    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Round-trip to the provider to prove the credentials work. The
    /// provider's error message is propagated verbatim on failure.
    fn verify_connection(&self) -> StoreResult<()>;

    /// The per-call timeout this client enforces.
    fn timeout(&self) -> Duration;
}

#[derive(Clone)]
struct StoredEntry {
    data: Bytes,
    metadata: RemoteMetadata,
}

/// In-memory [`ObjectClient`] for tests and embedding.
///
/// Assigns monotonically increasing ETags, stamps Last-Modified, counts
/// calls per operation (so tests can assert round-trips were or were not
/// made), and can be switched into a failing state to exercise connection
/// error paths.
pub struct InMemoryObjectClient {
    objects: RwLock<BTreeMap<String, StoredEntry>>,
    etag_counter: AtomicU64,
    put_calls: AtomicU64,
    get_calls: AtomicU64,
    head_calls: AtomicU64,
    list_calls: AtomicU64,
    failure: Mutex<Option<String>>,
    timeout: Duration,
}

impl InMemoryObjectClient {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            etag_counter: AtomicU64::new(0),
            put_calls: AtomicU64::new(0),
            get_calls: AtomicU64::new(0),
            head_calls: AtomicU64::new(0),
            list_calls: AtomicU64::new(0),
            failure: Mutex::new(None),
            timeout: Duration::from_secs(30),
        }
    }

    /// Make every subsequent call fail with the given provider message.
    /// Pass `None` to restore service.
    pub fn set_connection_failure(&self, message: Option<&str>) {
        *self.failure.lock().expect("lock poisoned") = message.map(str::to_string);
    }

    pub fn put_count(&self) -> u64 {
        self.put_calls.load(Ordering::Relaxed)
    }

    pub fn get_count(&self) -> u64 {
        self.get_calls.load(Ordering::Relaxed)
    }

    pub fn head_count(&self) -> u64 {
        self.head_calls.load(Ordering::Relaxed)
    }

    pub fn list_count(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    fn check_available(&self) -> StoreResult<()> {
        match self.failure.lock().expect("lock poisoned").as_ref() {
            Some(message) => Err(StoreError::Connection {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn next_etag(&self) -> String {
        format!("etag-{}", self.etag_counter.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for InMemoryObjectClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectClient for InMemoryObjectClient {
    fn put_object(&self, key: &str, data: &[u8]) -> StoreResult<RemoteMetadata> {
        self.check_available()?;
        self.put_calls.fetch_add(1, Ordering::Relaxed);
        let metadata = RemoteMetadata {
            etag: Some(self.next_etag()),
            last_modified: Some(Utc::now()),
            size: data.len() as u64,
        };
        self.objects.write().expect("lock poisoned").insert(
            key.to_string(),
            StoredEntry {
                data: Bytes::copy_from_slice(data),
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }

    fn get_object(&self, key: &str) -> StoreResult<Option<RemoteObject>> {
        self.check_available()?;
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(key).map(|e| RemoteObject {
            data: e.data.clone(),
            metadata: e.metadata.clone(),
        }))
    }

    fn head_object(&self, key: &str) -> StoreResult<Option<RemoteMetadata>> {
        self.check_available()?;
        self.head_calls.fetch_add(1, Ordering::Relaxed);
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(key).map(|e| e.metadata.clone()))
    }

    fn delete_object(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(map.remove(key).is_some())
    }

    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_available()?;
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let map = self.objects.read().expect("lock poisoned");
        Ok(map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn verify_connection(&self) -> StoreResult<()> {
        self.check_available()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrip() {
        let client = InMemoryObjectClient::new();
        let meta = client.put_object("a/b", b"payload").unwrap();
        assert_eq!(meta.size, 7);
        assert!(meta.etag.is_some());

        let obj = client.get_object("a/b").unwrap().expect("should exist");
        assert_eq!(&obj.data[..], b"payload");
        assert_eq!(obj.metadata, meta);
    }

    #[test]
    fn get_missing_key_is_none() {
        let client = InMemoryObjectClient::new();
        assert!(client.get_object("missing").unwrap().is_none());
        assert!(client.head_object("missing").unwrap().is_none());
    }

    #[test]
    fn etags_are_unique_per_put() {
        let client = InMemoryObjectClient::new();
        let a = client.put_object("k", b"v1").unwrap();
        let b = client.put_object("k", b"v2").unwrap();
        assert_ne!(a.etag, b.etag);
    }

    #[test]
    fn delete_reports_existence() {
        let client = InMemoryObjectClient::new();
        client.put_object("k", b"v").unwrap();
        assert!(client.delete_object("k").unwrap());
        assert!(!client.delete_object("k").unwrap());
    }

    #[test]
    fn list_filters_by_prefix() {
        let client = InMemoryObjectClient::new();
        client.put_object("a/1", b"").unwrap();
        client.put_object("a/2", b"").unwrap();
        client.put_object("b/1", b"").unwrap();
        let keys = client.list_keys("a/").unwrap();
        assert_eq!(keys, vec!["a/1".to_string(), "a/2".to_string()]);
    }

    #[test]
    fn failure_injection_carries_the_message_verbatim() {
        let client = InMemoryObjectClient::new();
        client.set_connection_failure(Some("InvalidAccessKeyId: key does not exist"));
        let err = client.get_object("k").unwrap_err();
        match err {
            StoreError::Connection { message } => {
                assert_eq!(message, "InvalidAccessKeyId: key does not exist");
            }
            other => panic!("expected connection error, got {other:?}"),
        }
        assert!(client.verify_connection().is_err());

        client.set_connection_failure(None);
        assert!(client.verify_connection().is_ok());
    }

    #[test]
    fn call_counters_track_operations() {
        let client = InMemoryObjectClient::new();
        client.put_object("k", b"v").unwrap();
        client.get_object("k").unwrap();
        client.get_object("k").unwrap();
        client.head_object("k").unwrap();
        assert_eq!(client.put_count(), 1);
        assert_eq!(client.get_count(), 2);
        assert_eq!(client.head_count(), 1);
    }
}
