use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// Content-hash algorithm used for blob metrics.
///
/// SHA-1 is the historical default of the sidecar format; stores may be
/// configured for SHA-256 instead. The algorithm also names the sidecar key
/// the digest is persisted under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// The sidecar property key the digest is stored under.
    pub fn property_key(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Parse an algorithm name as it appears in configuration or sidecars.
    pub fn parse(name: &str) -> Result<Self, AddressError> {
        match name {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            other => Err(AddressError::UnknownHashAlgorithm(other.to_string())),
        }
    }

    /// Digest length in hex characters.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Sha256 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.property_key())
    }
}

/// Size / hash / creation-time snapshot for one blob.
///
/// Metrics are computed once, while content streams into the store, and then
/// persisted in the sidecar. A copy may also ride along in a heavy
/// [`BlobRef`](crate::BlobRef) as a read-path optimization; that cached copy
/// is never authoritative for correctness-critical checks such as quota.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetrics {
    /// Content length in bytes.
    pub size: u64,
    /// Hex-encoded content digest.
    pub hash: String,
    /// Algorithm that produced `hash`.
    pub algorithm: HashAlgorithm,
    /// When the blob was created.
    pub creation_time: DateTime<Utc>,
}

impl BlobMetrics {
    /// Create a metrics snapshot.
    pub fn new(
        size: u64,
        hash: impl Into<String>,
        algorithm: HashAlgorithm,
        creation_time: DateTime<Utc>,
    ) -> Self {
        Self {
            size,
            hash: hash.into(),
            algorithm,
            creation_time,
        }
    }
}
