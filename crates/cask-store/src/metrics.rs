//! Per-store counters: cumulative operation metrics and live usage.
//!
//! Counters are plain atomics updated with relaxed increments so the write
//! path never takes a lock; readers (quota checks, health reporting) take
//! point-in-time snapshots. Each store instance owns its counters; there is
//! no process-wide metrics state.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cumulative download/upload counters for one store.
///
/// Monotonically increasing except on explicit [`reset`](Self::reset).
#[derive(Debug, Default)]
pub struct OperationMetrics {
    download_count: AtomicU64,
    download_bytes: AtomicU64,
    upload_count: AtomicU64,
    upload_bytes: AtomicU64,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one download of `bytes` content bytes.
    pub fn record_download(&self, bytes: u64) {
        self.download_count.fetch_add(1, Ordering::Relaxed);
        self.download_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one upload of `bytes` content bytes.
    pub fn record_upload(&self, bytes: u64) {
        self.upload_count.fetch_add(1, Ordering::Relaxed);
        self.upload_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all four counters.
    pub fn snapshot(&self) -> OperationMetricsSnapshot {
        OperationMetricsSnapshot {
            download_count: self.download_count.load(Ordering::Relaxed),
            download_bytes: self.download_bytes.load(Ordering::Relaxed),
            upload_count: self.upload_count.load(Ordering::Relaxed),
            upload_bytes: self.upload_bytes.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.download_count.store(0, Ordering::Relaxed);
        self.download_bytes.store(0, Ordering::Relaxed);
        self.upload_count.store(0, Ordering::Relaxed);
        self.upload_bytes.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of [`OperationMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OperationMetricsSnapshot {
    pub download_count: u64,
    pub download_bytes: u64,
    pub upload_count: u64,
    pub upload_bytes: u64,
}

/// Live blob-count / byte-total for one store.
///
/// Maintained incrementally on create and hard-delete, rebuilt once at
/// store start. Quota checks read these counters; they never scan the
/// store.
#[derive(Debug, Default)]
pub struct UsageCounters {
    blob_count: AtomicU64,
    total_bytes: AtomicU64,
}

impl UsageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a newly written blob.
    pub fn add_blob(&self, size: u64) {
        self.blob_count.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    /// Account for a hard-deleted blob. Saturates at zero.
    pub fn remove_blob(&self, size: u64) {
        let _ = self
            .blob_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
        let _ = self
            .total_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(size))
            });
    }

    /// Replace both counters, used when rebuilding at store start.
    pub fn set(&self, blob_count: u64, total_bytes: u64) {
        self.blob_count.store(blob_count, Ordering::Relaxed);
        self.total_bytes.store(total_bytes, Ordering::Relaxed);
    }

    /// Point-in-time snapshot.
    pub fn snapshot(&self) -> StoreUsage {
        StoreUsage {
            blob_count: self.blob_count.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a store's live usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreUsage {
    pub blob_count: u64,
    pub total_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_counters_accumulate() {
        let m = OperationMetrics::new();
        m.record_upload(100);
        m.record_upload(50);
        m.record_download(30);
        let s = m.snapshot();
        assert_eq!(s.upload_count, 2);
        assert_eq!(s.upload_bytes, 150);
        assert_eq!(s.download_count, 1);
        assert_eq!(s.download_bytes, 30);
    }

    #[test]
    fn reset_zeroes_everything() {
        let m = OperationMetrics::new();
        m.record_upload(10);
        m.record_download(10);
        m.reset();
        assert_eq!(m.snapshot(), OperationMetricsSnapshot::default());
    }

    #[test]
    fn usage_tracks_adds_and_removes() {
        let u = UsageCounters::new();
        u.add_blob(100);
        u.add_blob(200);
        assert_eq!(
            u.snapshot(),
            StoreUsage {
                blob_count: 2,
                total_bytes: 300
            }
        );
        u.remove_blob(100);
        assert_eq!(
            u.snapshot(),
            StoreUsage {
                blob_count: 1,
                total_bytes: 200
            }
        );
    }

    #[test]
    fn usage_removal_saturates_at_zero() {
        let u = UsageCounters::new();
        u.remove_blob(50);
        assert_eq!(u.snapshot(), StoreUsage::default());
    }

    #[test]
    fn usage_set_replaces_counters() {
        let u = UsageCounters::new();
        u.add_blob(1);
        u.set(7, 700);
        assert_eq!(
            u.snapshot(),
            StoreUsage {
                blob_count: 7,
                total_bytes: 700
            }
        );
    }

    #[test]
    fn concurrent_increments_do_not_lose_updates() {
        use std::sync::Arc;
        use std::thread;

        let m = Arc::new(OperationMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_upload(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }
        assert_eq!(m.snapshot().upload_count, 8000);
        assert_eq!(m.snapshot().upload_bytes, 8000);
    }
}
