/// Errors from parsing blob ids and blob refs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// The ref text has no store-name segment.
    #[error("blob ref {0:?} is missing a store name")]
    MissingStoreName(String),

    /// The ref text has no blob-id segment.
    #[error("blob ref {0:?} is missing a blob id")]
    MissingBlobId(String),

    /// The store name contains characters the encoding cannot carry.
    #[error("invalid store name {name:?}: {reason}")]
    InvalidStoreName { name: String, reason: String },

    /// The blob id does not satisfy the id grammar.
    #[error("invalid blob id {id:?}: {reason}")]
    InvalidBlobId { id: String, reason: String },

    /// An unrecognized hash-algorithm name.
    #[error("unknown hash algorithm {0:?}")]
    UnknownHashAlgorithm(String),
}
