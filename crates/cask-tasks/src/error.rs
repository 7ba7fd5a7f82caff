use cask_store::StoreError;

/// Errors from maintenance tasks.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// A running move task references the same store; compacting now would
    /// race the transfer. Fatal for the requested operation, never retried
    /// automatically.
    #[error("compaction of store {store:?} conflicts with running move task {task_id:?}")]
    Conflict { store: String, task_id: String },

    /// The configured store name matches nothing in the registry.
    #[error("no blob store named {0:?}")]
    UnknownStore(String),

    /// The task observed its cancellation signal and stopped.
    #[error("task canceled")]
    Canceled,

    /// The worker pool is no longer accepting jobs.
    #[error("worker pool is shut down")]
    PoolClosed,

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for task operations.
pub type TaskResult<T> = Result<T, TaskError>;
