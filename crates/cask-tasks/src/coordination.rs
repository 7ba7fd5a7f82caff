//! Cluster coordination: advisory resource locks with leased expiry.
//!
//! Operations that must run on exactly one node at a time acquire a named
//! resource lock before starting. Locks are advisory leases: a holder that
//! crashes without releasing simply has its lease expire, after which
//! another node may acquire; no heartbeat mechanism is assumed. Callers
//! acquire through [`acquire_scoped`] so the release runs on every exit
//! path, failure included.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Outcome of a lock acquisition attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockLease {
    /// Whether the lock was granted.
    pub acquired: bool,
    /// Node currently holding the lock (the acquirer on success).
    pub owner: String,
}

/// Distributed mutual exclusion seam.
///
/// Multi-node deployments plug in an implementation backed by their
/// coordination service; the default [`LocalResourceLocks`] covers
/// single-node deployments.
pub trait ResourceLocks: Send + Sync {
    /// Try to acquire `key` for at most `lease`. Never blocks.
    fn acquire(&self, key: &str, lease: Duration) -> LockLease;

    /// Release `key`. Releasing a lock that is not held is a no-op.
    fn release(&self, key: &str);
}

/// Single-node [`ResourceLocks`]: always grants, owner `"local"`.
///
/// Leases are still recorded so operators can inspect what the process
/// believes it holds.
#[derive(Default)]
pub struct LocalResourceLocks {
    // key -> expiry; None = no expiry recorded (saturated lease).
    leases: Mutex<HashMap<String, Option<Instant>>>,
}

impl LocalResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held (and its lease has not expired).
    pub fn held(&self, key: &str) -> bool {
        let leases = self.leases.lock().expect("lock poisoned");
        match leases.get(key) {
            Some(Some(expiry)) => *expiry > Instant::now(),
            Some(None) => true,
            None => false,
        }
    }
}

impl ResourceLocks for LocalResourceLocks {
    fn acquire(&self, key: &str, lease: Duration) -> LockLease {
        let expiry = Instant::now().checked_add(lease);
        self.leases
            .lock()
            .expect("lock poisoned")
            .insert(key.to_string(), expiry);
        debug!(key, ?lease, "acquired local resource lock");
        LockLease {
            acquired: true,
            owner: "local".to_string(),
        }
    }

    fn release(&self, key: &str) {
        self.leases.lock().expect("lock poisoned").remove(key);
        debug!(key, "released local resource lock");
    }
}

/// Holds a resource lock until dropped.
pub struct ResourceLockGuard<'a> {
    locks: &'a dyn ResourceLocks,
    key: String,
    /// Node that granted the lease.
    pub owner: String,
}

impl Drop for ResourceLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}

/// Acquire `key`, returning a guard that releases on drop, including on
/// panic and early-return paths. `None` when another node holds the lock.
pub fn acquire_scoped<'a>(
    locks: &'a dyn ResourceLocks,
    key: &str,
    lease: Duration,
) -> Option<ResourceLockGuard<'a>> {
    let result = locks.acquire(key, lease);
    if !result.acquired {
        debug!(key, owner = %result.owner, "resource lock held elsewhere");
        return None;
    }
    Some(ResourceLockGuard {
        locks,
        key: key.to_string(),
        owner: result.owner,
    })
}
