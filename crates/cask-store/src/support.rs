//! Helpers shared by every backend: streamed hashing, the lifecycle guard,
//! per-id write serialization, and the temp→permanent header rules.
//!
//! Backends are independent structs, not an inheritance tree; the logic
//! they genuinely share lives here as free functions and small value types.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use cask_types::{headers, BlobId, Headers, HashAlgorithm};

use crate::attributes::BlobAttributes;
use crate::error::{StoreError, StoreResult};

/// Lifecycle phases of a store instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not yet started.
    New,
    /// Running; operations are admitted.
    Started,
    /// Shut down; operations fail fast.
    Stopped,
}

/// Tracks a store's lifecycle state and guards every operation on it.
#[derive(Debug)]
pub struct Lifecycle {
    state: RwLock<LifecycleState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::New),
        }
    }

    pub fn current(&self) -> LifecycleState {
        *self.state.read().expect("lock poisoned")
    }

    pub fn start(&self) {
        *self.state.write().expect("lock poisoned") = LifecycleState::Started;
    }

    pub fn stop(&self) {
        *self.state.write().expect("lock poisoned") = LifecycleState::Stopped;
    }

    /// Fail fast unless the store has been started.
    pub fn ensure_started(&self, store: &str) -> StoreResult<()> {
        match self.current() {
            LifecycleState::Started => Ok(()),
            _ => Err(StoreError::NotStarted(store.to_string())),
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy `content` into `dest`, hashing as it streams.
///
/// Returns the byte count and the hex digest. This is the single place
/// size and hash are computed, so metrics always describe exactly the bytes
/// that were written.
pub fn copy_and_hash(
    content: &mut dyn Read,
    dest: &mut dyn Write,
    algorithm: HashAlgorithm,
) -> std::io::Result<(u64, String)> {
    match algorithm {
        HashAlgorithm::Sha1 => copy_with_digest::<Sha1>(content, dest),
        HashAlgorithm::Sha256 => copy_with_digest::<Sha256>(content, dest),
    }
}

fn copy_with_digest<D: Digest>(
    content: &mut dyn Read,
    dest: &mut dyn Write,
) -> std::io::Result<(u64, String)> {
    let mut digest = D::new();
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = content.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
        dest.write_all(&buf[..n])?;
        total += n as u64;
    }
    dest.flush()?;
    Ok((total, hex::encode(digest.finalize())))
}

/// Reject promotion headers that re-declare the temporary marker.
pub fn ensure_no_temporary_header(new_headers: &Headers) -> StoreResult<()> {
    if headers::is_temporary(new_headers) {
        return Err(StoreError::InvalidHeaders(format!(
            "promotion headers must not carry the {:?} marker",
            headers::TEMPORARY_HEADER
        )));
    }
    Ok(())
}

/// Headers for a promoted blob: the stored set minus the temporary marker,
/// overlaid with the caller's final headers.
pub fn promote_headers(stored: &Headers, extra: &Headers) -> Headers {
    let mut merged = stored.clone();
    merged.remove(headers::TEMPORARY_HEADER);
    for (k, v) in extra {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// The current instant truncated to millisecond resolution, the precision
/// the sidecar format persists, so in-memory and re-read metrics agree.
pub fn now_millis() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis())
        .expect("current time fits in millis")
}

/// The cutoff instant for a compaction sweep: records whose relevant
/// timestamp is at or before the cutoff are old enough to reclaim. `None`
/// when `older_than` is so large nothing can be eligible.
pub fn compaction_threshold(older_than: std::time::Duration) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::from_std(older_than).unwrap_or(TimeDelta::MAX);
    Utc::now().checked_sub_signed(delta)
}

/// Whether a sidecar record is old enough and in a reclaimable state:
/// soft-deleted, or an abandoned temporary that was never promoted.
pub fn eligible_for_compaction(attrs: &BlobAttributes, threshold: DateTime<Utc>) -> bool {
    if attrs.deleted {
        attrs
            .deleted_datetime
            .unwrap_or(attrs.metrics.creation_time)
            <= threshold
    } else if attrs.is_temporary() {
        attrs.metrics.creation_time <= threshold
    } else {
        false
    }
}

/// Striped mutexes serializing writes to the same blob id.
///
/// Two writers to one id always contend on the same stripe; writers to
/// different ids almost never do.
#[derive(Debug)]
pub struct IdLocks {
    stripes: Vec<Mutex<()>>,
}

impl IdLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Lock the stripe for `id` for the duration of the returned guard.
    pub fn lock(&self, id: &BlobId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        id.as_str().hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[idx].lock().expect("lock poisoned")
    }
}

impl Default for IdLocks {
    fn default() -> Self {
        Self::new(64)
    }
}
