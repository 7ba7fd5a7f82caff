use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AddressError;

/// Maximum accepted length for a caller-supplied blob id.
const MAX_ID_LEN: usize = 128;

/// Opaque identifier for one blob within one store.
///
/// Backend-assigned ids are UUIDv7 strings. Caller-supplied ids are accepted
/// when they satisfy the id grammar: 1–128 characters drawn from
/// `[A-Za-z0-9._-]`. The grammar excludes `@` (the ref delimiter) and path
/// separators because ids are embedded verbatim in ref encodings and in
/// backend file names. Immutable once created.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    /// Generate a fresh backend-assigned id (UUIDv7, time-ordered).
    pub fn random() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Validate and wrap a caller-supplied id.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        if s.is_empty() {
            return Err(AddressError::InvalidBlobId {
                id: s.to_string(),
                reason: "empty".to_string(),
            });
        }
        if s.len() > MAX_ID_LEN {
            return Err(AddressError::InvalidBlobId {
                id: s.to_string(),
                reason: format!("longer than {MAX_ID_LEN} characters"),
            });
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(AddressError::InvalidBlobId {
                id: s.to_string(),
                reason: format!("illegal character {bad:?}"),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// The id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlobId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for BlobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_satisfy_the_grammar() {
        let id = BlobId::random();
        assert!(BlobId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn random_ids_are_unique() {
        assert_ne!(BlobId::random(), BlobId::random());
    }

    #[test]
    fn accepts_simple_ids() {
        for ok in ["a", "abc-123", "release_2.4.1", "0f8fad5b-d9cb"] {
            assert!(BlobId::parse(ok).is_ok(), "{ok} should parse");
        }
    }

    #[test]
    fn rejects_empty_id() {
        assert!(matches!(
            BlobId::parse(""),
            Err(AddressError::InvalidBlobId { .. })
        ));
    }

    #[test]
    fn rejects_delimiter_and_path_characters() {
        for bad in ["a@b", "a/b", "a\\b", "a b", "a\nb", "../etc"] {
            assert!(BlobId::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn rejects_overlong_id() {
        let long = "x".repeat(129);
        assert!(BlobId::parse(&long).is_err());
        let max = "x".repeat(128);
        assert!(BlobId::parse(&max).is_ok());
    }

    #[test]
    fn from_str_roundtrip() {
        let id: BlobId = "my-blob.01".parse().unwrap();
        assert_eq!(id.to_string(), "my-blob.01");
    }

    #[test]
    fn serde_is_transparent() {
        let id = BlobId::parse("abc-1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc-1\"");
        let back: BlobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
