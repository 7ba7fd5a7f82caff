use cask_types::{AddressError, BlobId};

/// Errors from blob store operations.
///
/// A closed set of kinds so callers pattern-match instead of inspecting
/// messages. Absence on the read path is `Ok(None)`, never an error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store's lifecycle has not reached the running state.
    #[error("blob store {0:?} is not started")]
    NotStarted(String),

    /// Caller-supplied headers are not acceptable for the operation.
    #[error("invalid headers: {0}")]
    InvalidHeaders(String),

    /// A caller-supplied id collides with an existing blob.
    #[error("blob id {0} is already in use")]
    IdInUse(BlobId),

    /// The blob an operation requires has vanished (caller bug, e.g.
    /// promoting an id that was never created).
    #[error("blob {0} not found")]
    NotFound(BlobId),

    /// Attributes and content are in an inconsistent pairing.
    #[error("corrupt blob {id}: {reason}")]
    Corrupt { id: BlobId, reason: String },

    /// A sidecar attributes record could not be decoded.
    #[error("malformed attributes record: {0}")]
    Attributes(String),

    /// A blob id or ref failed validation.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// The cloud provider rejected or dropped a call. Carries the provider
    /// message verbatim; never retried inside the store.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Store configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
