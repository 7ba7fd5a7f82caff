//! The compaction (garbage collection) task.
//!
//! Sweeps soft-deleted and abandoned-temporary blobs out of one store or
//! all of them. One job per store, run on a bounded worker pool; at most
//! one compaction is ever in flight per store, and a store being migrated
//! by a running move task is never compacted. The report's removed count is
//! the task's primary observable result.

use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use cask_store::{BlobStore, BlobStoreRegistry, CancelToken, QuotaService};

use crate::conflict::TaskRegistry;
use crate::coordination::{acquire_scoped, LocalResourceLocks, ResourceLocks};
use crate::error::{TaskError, TaskResult};
use crate::pool::WorkerPool;

/// Which stores a run covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreSelector {
    /// Every registered store, one job each.
    All,
    /// A single store by name.
    Named(String),
}

/// Configuration for one compaction run.
#[derive(Clone, Debug)]
pub struct CompactionConfig {
    /// Target store(s).
    pub selector: StoreSelector,
    /// Only blobs soft-deleted (or left temporary) at least this many days
    /// ago are reclaimed. Zero means immediately eligible.
    pub blobs_older_than_days: u32,
    /// Worker threads for the per-store jobs.
    pub workers: usize,
    /// Pending-job queue capacity.
    pub queue_capacity: usize,
    /// Cluster lock lease per store job.
    pub lock_lease: Duration,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            selector: StoreSelector::All,
            blobs_older_than_days: 0,
            workers: 4,
            queue_capacity: 16,
            lock_lease: Duration::from_secs(3600),
        }
    }
}

impl CompactionConfig {
    /// Compact every registered store.
    pub fn all() -> Self {
        Self::default()
    }

    /// Compact one store.
    pub fn for_store(name: impl Into<String>) -> Self {
        Self {
            selector: StoreSelector::Named(name.into()),
            ..Self::default()
        }
    }

    /// Builder-style age threshold.
    pub fn with_blobs_older_than_days(mut self, days: u32) -> Self {
        self.blobs_older_than_days = days;
        self
    }

    fn older_than(&self) -> Duration {
        Duration::from_secs(u64::from(self.blobs_older_than_days) * 24 * 60 * 60)
    }
}

/// How one store's job ended.
#[derive(Debug)]
pub enum StoreOutcome {
    /// The sweep ran; this many blobs were removed.
    Compacted { removed: u64 },
    /// A running move task references the store; nothing was deleted.
    Conflict { task_id: String },
    /// The job did not run (lock held elsewhere, already in flight, or
    /// canceled before starting).
    Skipped { reason: String },
    /// The sweep itself failed.
    Failed(TaskError),
}

/// One store's entry in the report.
#[derive(Debug)]
pub struct StoreReport {
    pub store: String,
    pub outcome: StoreOutcome,
}

/// Result of a compaction run.
#[derive(Debug, Default)]
pub struct CompactionReport {
    /// Per-store outcomes, sorted by store name.
    pub outcomes: Vec<StoreReport>,
}

impl CompactionReport {
    /// Total blobs removed across all stores, the task's primary
    /// observable result.
    pub fn total_removed(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|r| match r.outcome {
                StoreOutcome::Compacted { removed } => removed,
                _ => 0,
            })
            .sum()
    }
}

/// The compaction task.
///
/// The task registry is an explicitly optional dependency: without one the
/// move-conflict check is a no-op (single-purpose deployments have no
/// scheduler to ask).
pub struct CompactionTask {
    stores: Arc<BlobStoreRegistry>,
    tasks: Option<Arc<TaskRegistry>>,
    locks: Arc<dyn ResourceLocks>,
    quota: Option<QuotaService>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl CompactionTask {
    pub fn new(stores: Arc<BlobStoreRegistry>) -> Self {
        Self {
            stores,
            tasks: None,
            locks: Arc::new(LocalResourceLocks::new()),
            quota: None,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Wire in the scheduler's task registry for move-conflict checks.
    pub fn with_task_registry(mut self, tasks: Arc<TaskRegistry>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Replace the cluster lock implementation.
    pub fn with_locks(mut self, locks: Arc<dyn ResourceLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Log quota status after each store's sweep.
    pub fn with_quota(mut self, quota: QuotaService) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Run one compaction pass.
    ///
    /// In single-store mode a move conflict or sweep failure is fatal and
    /// returned as an error; in all-stores mode each store's outcome is
    /// reported independently and the run itself succeeds.
    pub fn run(
        &self,
        config: &CompactionConfig,
        cancel: &CancelToken,
    ) -> TaskResult<CompactionReport> {
        let stores: Vec<Arc<dyn BlobStore>> = match &config.selector {
            StoreSelector::Named(name) => {
                vec![self
                    .stores
                    .get(name)
                    .ok_or_else(|| TaskError::UnknownStore(name.clone()))?]
            }
            StoreSelector::All => self.stores.all(),
        };
        info!(
            stores = stores.len(),
            older_than_days = config.blobs_older_than_days,
            "compaction run starting"
        );

        let older_than = config.older_than();
        let (tx, rx) = mpsc::channel::<StoreReport>();
        let pool = WorkerPool::new(config.workers, config.queue_capacity);
        for store in stores {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let tasks = self.tasks.clone();
            let locks = Arc::clone(&self.locks);
            let quota = self.quota;
            let in_flight = Arc::clone(&self.in_flight);
            let lease = config.lock_lease;
            pool.submit(move || {
                let name = store.name().to_string();
                let outcome = run_store_job(
                    store.as_ref(),
                    tasks.as_deref(),
                    locks.as_ref(),
                    quota.as_ref(),
                    &in_flight,
                    older_than,
                    lease,
                    &cancel,
                );
                let _ = tx.send(StoreReport {
                    store: name,
                    outcome,
                });
            })?;
        }
        drop(tx);
        pool.shutdown();

        let mut outcomes: Vec<StoreReport> = rx.into_iter().collect();
        outcomes.sort_by(|a, b| a.store.cmp(&b.store));

        if let StoreSelector::Named(name) = &config.selector {
            // A single-store run surfaces its failure as the task's own.
            if let Some(position) = outcomes.iter().position(|r| {
                matches!(
                    r.outcome,
                    StoreOutcome::Conflict { .. } | StoreOutcome::Failed(_)
                )
            }) {
                return Err(match outcomes.swap_remove(position).outcome {
                    StoreOutcome::Conflict { task_id } => TaskError::Conflict {
                        store: name.clone(),
                        task_id,
                    },
                    StoreOutcome::Failed(err) => err,
                    _ => unreachable!("position matched conflict or failure"),
                });
            }
        }

        let report = CompactionReport { outcomes };
        info!(removed = report.total_removed(), "compaction run finished");
        Ok(report)
    }
}

#[allow(clippy::too_many_arguments)]
fn run_store_job(
    store: &dyn BlobStore,
    tasks: Option<&TaskRegistry>,
    locks: &dyn ResourceLocks,
    quota: Option<&QuotaService>,
    in_flight: &Mutex<HashSet<String>>,
    older_than: Duration,
    lease: Duration,
    cancel: &CancelToken,
) -> StoreOutcome {
    let name = store.name();
    if cancel.is_canceled() {
        return StoreOutcome::Skipped {
            reason: "canceled before start".to_string(),
        };
    }

    // Never compact a store a running move task is migrating.
    if let Some(tasks) = tasks {
        if let Some(conflict) = tasks.find_move_conflict(name) {
            warn!(store = name, task = %conflict.id, "move task in flight, refusing to compact");
            return StoreOutcome::Conflict {
                task_id: conflict.id,
            };
        }
    }

    // At most one compaction job per store at a time, in this process.
    if !in_flight
        .lock()
        .expect("lock poisoned")
        .insert(name.to_string())
    {
        return StoreOutcome::Skipped {
            reason: "compaction already in flight".to_string(),
        };
    }
    let _slot = InFlightSlot {
        set: in_flight,
        name: name.to_string(),
    };

    // And at most one across the cluster.
    let key = format!("compact:{name}");
    let Some(lock) = acquire_scoped(locks, &key, lease) else {
        return StoreOutcome::Skipped {
            reason: "cluster lock held elsewhere".to_string(),
        };
    };
    debug!(store = name, owner = %lock.owner, "compacting");

    match store.compact(quota, older_than, cancel) {
        Ok(removed) => StoreOutcome::Compacted { removed },
        Err(err) => StoreOutcome::Failed(TaskError::Store(err)),
    }
}

struct InFlightSlot<'a> {
    set: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.set.lock().expect("lock poisoned").remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{TaskDescriptor, TaskState, DESTINATION_ATTRIBUTE, MOVE_TYPE_ID,
        SOURCE_ATTRIBUTE};
    use crate::coordination::LockLease;
    use cask_store::{BlobStore, InMemoryBlobStore};
    use cask_types::Headers;
    use std::io::Cursor;

    fn registry_with_garbage(names: &[&str], garbage_per_store: usize) -> Arc<BlobStoreRegistry> {
        let registry = BlobStoreRegistry::new();
        for name in names {
            let store = InMemoryBlobStore::new(*name);
            for i in 0..garbage_per_store {
                let blob = store
                    .create(
                        &mut Cursor::new(format!("{name}-{i}").into_bytes()),
                        Headers::new(),
                    )
                    .unwrap();
                let blob = store.make_permanent(&blob, Headers::new()).unwrap();
                store.delete(&blob.id, "expired").unwrap();
            }
            registry.register(Arc::new(store)).unwrap();
        }
        Arc::new(registry)
    }

    fn running_move(id: &str, source: &str, destination: &str) -> TaskDescriptor {
        TaskDescriptor::new(id, MOVE_TYPE_ID)
            .with_attribute(SOURCE_ATTRIBUTE, source)
            .with_attribute(DESTINATION_ATTRIBUTE, destination)
            .with_state(TaskState::Running)
    }

    // -----------------------------------------------------------------------
    // Basic sweeps
    // -----------------------------------------------------------------------

    #[test]
    fn single_store_sweep_reports_the_count() {
        let stores = registry_with_garbage(&["default"], 3);
        let task = CompactionTask::new(Arc::clone(&stores));
        let report = task
            .run(&CompactionConfig::for_store("default"), &CancelToken::new())
            .unwrap();
        assert_eq!(report.total_removed(), 3);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(stores.get("default").unwrap().usage().blob_count, 0);
    }

    #[test]
    fn all_stores_run_one_job_each() {
        let stores = registry_with_garbage(&["a", "b", "c"], 2);
        let task = CompactionTask::new(Arc::clone(&stores));
        let report = task
            .run(&CompactionConfig::all(), &CancelToken::new())
            .unwrap();
        assert_eq!(report.total_removed(), 6);
        let names: Vec<&str> = report.outcomes.iter().map(|r| r.store.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn age_threshold_spares_recent_deletions() {
        let stores = registry_with_garbage(&["default"], 2);
        let task = CompactionTask::new(Arc::clone(&stores));
        let config = CompactionConfig::for_store("default").with_blobs_older_than_days(7);
        let report = task.run(&config, &CancelToken::new()).unwrap();
        assert_eq!(report.total_removed(), 0);
        assert_eq!(stores.get("default").unwrap().usage().blob_count, 2);
    }

    #[test]
    fn unknown_store_is_an_error() {
        let stores = registry_with_garbage(&[], 0);
        let task = CompactionTask::new(stores);
        assert!(matches!(
            task.run(&CompactionConfig::for_store("ghost"), &CancelToken::new()),
            Err(TaskError::UnknownStore(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Move conflicts
    // -----------------------------------------------------------------------

    #[test]
    fn move_conflict_is_fatal_and_deletes_nothing() {
        let stores = registry_with_garbage(&["default"], 3);
        let tasks = Arc::new(TaskRegistry::new());
        tasks.upsert(running_move("move-1", "default", "archive"));
        let task = CompactionTask::new(Arc::clone(&stores)).with_task_registry(tasks);

        let err = task
            .run(&CompactionConfig::for_store("default"), &CancelToken::new())
            .unwrap_err();
        match err {
            TaskError::Conflict { store, task_id } => {
                assert_eq!(store, "default");
                assert_eq!(task_id, "move-1");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        // Zero deletions happened.
        assert_eq!(stores.get("default").unwrap().usage().blob_count, 3);
    }

    #[test]
    fn move_destination_also_conflicts() {
        let stores = registry_with_garbage(&["archive"], 1);
        let tasks = Arc::new(TaskRegistry::new());
        tasks.upsert(running_move("move-2", "default", "archive"));
        let task = CompactionTask::new(stores).with_task_registry(tasks);
        assert!(matches!(
            task.run(&CompactionConfig::for_store("archive"), &CancelToken::new()),
            Err(TaskError::Conflict { .. })
        ));
    }

    #[test]
    fn all_mode_isolates_the_conflicted_store() {
        let stores = registry_with_garbage(&["busy", "idle"], 2);
        let tasks = Arc::new(TaskRegistry::new());
        tasks.upsert(running_move("move-3", "busy", "elsewhere"));
        let task = CompactionTask::new(Arc::clone(&stores)).with_task_registry(tasks);

        let report = task
            .run(&CompactionConfig::all(), &CancelToken::new())
            .unwrap();
        assert_eq!(report.total_removed(), 2);
        let busy = report
            .outcomes
            .iter()
            .find(|r| r.store == "busy")
            .unwrap();
        assert!(matches!(busy.outcome, StoreOutcome::Conflict { .. }));
        assert_eq!(stores.get("busy").unwrap().usage().blob_count, 2);
        assert_eq!(stores.get("idle").unwrap().usage().blob_count, 0);
    }

    #[test]
    fn finished_moves_do_not_block_compaction() {
        let stores = registry_with_garbage(&["default"], 1);
        let tasks = Arc::new(TaskRegistry::new());
        tasks.upsert(running_move("old-move", "default", "x").with_state(TaskState::Done));
        let task = CompactionTask::new(stores).with_task_registry(tasks);
        let report = task
            .run(&CompactionConfig::for_store("default"), &CancelToken::new())
            .unwrap();
        assert_eq!(report.total_removed(), 1);
    }

    #[test]
    fn without_a_task_registry_the_check_is_a_noop() {
        let stores = registry_with_garbage(&["default"], 1);
        let task = CompactionTask::new(stores);
        let report = task
            .run(&CompactionConfig::for_store("default"), &CancelToken::new())
            .unwrap();
        assert_eq!(report.total_removed(), 1);
    }

    // -----------------------------------------------------------------------
    // Locks and cancellation
    // -----------------------------------------------------------------------

    struct DenyAllLocks;

    impl ResourceLocks for DenyAllLocks {
        fn acquire(&self, _key: &str, _lease: Duration) -> LockLease {
            LockLease {
                acquired: false,
                owner: "node-elsewhere".to_string(),
            }
        }

        fn release(&self, _key: &str) {}
    }

    #[test]
    fn unacquired_cluster_lock_skips_the_store() {
        let stores = registry_with_garbage(&["default"], 2);
        let task = CompactionTask::new(Arc::clone(&stores)).with_locks(Arc::new(DenyAllLocks));
        let report = task
            .run(&CompactionConfig::for_store("default"), &CancelToken::new())
            .unwrap();
        assert_eq!(report.total_removed(), 0);
        assert!(matches!(
            report.outcomes[0].outcome,
            StoreOutcome::Skipped { .. }
        ));
        assert_eq!(stores.get("default").unwrap().usage().blob_count, 2);
    }

    #[test]
    fn cancellation_before_start_skips_every_store() {
        let stores = registry_with_garbage(&["a", "b"], 2);
        let task = CompactionTask::new(Arc::clone(&stores));
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = task.run(&CompactionConfig::all(), &cancel).unwrap();
        assert_eq!(report.total_removed(), 0);
        for outcome in &report.outcomes {
            assert!(matches!(outcome.outcome, StoreOutcome::Skipped { .. }));
        }
    }

    #[test]
    fn quota_checker_rides_along() {
        let stores = registry_with_garbage(&["default"], 1);
        let task = CompactionTask::new(stores).with_quota(QuotaService::new());
        let report = task
            .run(&CompactionConfig::for_store("default"), &CancelToken::new())
            .unwrap();
        assert_eq!(report.total_removed(), 1);
    }
}
