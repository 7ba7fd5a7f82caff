use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AddressError;
use crate::id::BlobId;
use crate::metrics::BlobMetrics;

/// Store-qualified reference to a blob.
///
/// Two flavors share one type:
///
/// - a *light* ref carries only the store name and blob id; every read
///   re-fetches metadata from the backend.
/// - a *heavy* ref additionally carries a cached [`BlobMetrics`] snapshot
///   and the instant the snapshot was taken, letting a backend that trusts
///   its metadata mirror skip a round-trip on the read path.
///
/// The stable text encoding is `store@id` for light refs and
/// `store@id@timestamp_millis` for heavy refs. The cached metrics snapshot
/// travels in-process only; it is never part of the encoding, and it is
/// never authoritative for correctness-critical checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    /// Name of the store that owns the blob.
    pub store: String,
    /// The blob id within that store.
    pub blob: BlobId,
    /// Cached metrics snapshot (in-process only, advisory).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metrics: Option<BlobMetrics>,
    /// When the cached snapshot was taken. Millisecond resolution.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl BlobRef {
    /// Create a light ref.
    pub fn light(store: impl Into<String>, blob: BlobId) -> Result<Self, AddressError> {
        let store = store.into();
        validate_store_name(&store)?;
        Ok(Self {
            store,
            blob,
            metrics: None,
            timestamp: None,
        })
    }

    /// Create a heavy ref carrying a metrics snapshot taken at `timestamp`.
    ///
    /// The timestamp is truncated to millisecond resolution so that the
    /// encoded and decoded forms agree.
    pub fn heavy(
        store: impl Into<String>,
        blob: BlobId,
        metrics: BlobMetrics,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, AddressError> {
        let store = store.into();
        validate_store_name(&store)?;
        Ok(Self {
            store,
            blob,
            metrics: Some(metrics),
            timestamp: DateTime::from_timestamp_millis(timestamp.timestamp_millis()),
        })
    }

    /// Returns `true` if this ref carries a cached metrics snapshot.
    pub fn is_heavy(&self) -> bool {
        self.metrics.is_some()
    }

    /// Parse the stable text encoding.
    ///
    /// The store name and blob id are mandatory and strictly validated. The
    /// trailing timestamp segment is advisory: if it is present but
    /// malformed the ref still parses, with `timestamp` absent.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let mut parts = text.splitn(3, '@');
        let store = parts.next().unwrap_or("");
        if store.is_empty() {
            return Err(AddressError::MissingStoreName(text.to_string()));
        }
        validate_store_name(store)?;
        let id = match parts.next() {
            Some(id) if !id.is_empty() => id,
            _ => return Err(AddressError::MissingBlobId(text.to_string())),
        };
        let blob = BlobId::parse(id)?;
        // Advisory segment: parse permissively, never abort the whole ref.
        let timestamp = parts
            .next()
            .and_then(|seg| seg.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);
        Ok(Self {
            store: store.to_string(),
            blob,
            metrics: None,
            timestamp,
        })
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "{}@{}@{}", self.store, self.blob, ts.timestamp_millis()),
            None => write!(f, "{}@{}", self.store, self.blob),
        }
    }
}

impl FromStr for BlobRef {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Validate a store name for use in the ref encoding.
///
/// Store names must be non-empty and must not contain `@` (the segment
/// delimiter) or control characters.
pub fn validate_store_name(name: &str) -> Result<(), AddressError> {
    if name.is_empty() {
        return Err(AddressError::InvalidStoreName {
            name: name.to_string(),
            reason: "empty".to_string(),
        });
    }
    if let Some(bad) = name.chars().find(|c| *c == '@' || c.is_control()) {
        return Err(AddressError::InvalidStoreName {
            name: name.to_string(),
            reason: format!("illegal character {bad:?}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::HashAlgorithm;

    fn metrics() -> BlobMetrics {
        BlobMetrics::new(
            128,
            "da39a3ee5e6b4b0d3255bfef95601890afd80709",
            HashAlgorithm::Sha1,
            Utc::now(),
        )
    }

    // -----------------------------------------------------------------------
    // Light refs
    // -----------------------------------------------------------------------

    #[test]
    fn light_ref_roundtrip() {
        let r = BlobRef::light("default", BlobId::parse("abc-123").unwrap()).unwrap();
        let text = r.to_string();
        assert_eq!(text, "default@abc-123");
        assert_eq!(BlobRef::parse(&text).unwrap(), r);
    }

    #[test]
    fn light_ref_is_not_heavy() {
        let r = BlobRef::light("s", BlobId::random()).unwrap();
        assert!(!r.is_heavy());
        assert!(r.timestamp.is_none());
    }

    // -----------------------------------------------------------------------
    // Heavy refs
    // -----------------------------------------------------------------------

    #[test]
    fn heavy_ref_encodes_timestamp_only() {
        let ts = Utc::now();
        let r = BlobRef::heavy("default", BlobId::parse("abc").unwrap(), metrics(), ts).unwrap();
        let text = r.to_string();
        assert_eq!(text, format!("default@abc@{}", ts.timestamp_millis()));

        let parsed = BlobRef::parse(&text).unwrap();
        assert_eq!(parsed.store, "default");
        assert_eq!(parsed.blob.as_str(), "abc");
        // The cached metrics snapshot does not survive the encoding.
        assert!(parsed.metrics.is_none());
        // The timestamp does, at millisecond resolution.
        assert_eq!(
            parsed.timestamp.unwrap().timestamp_millis(),
            ts.timestamp_millis()
        );
    }

    #[test]
    fn heavy_ref_timestamp_is_truncated_to_millis() {
        let ts = Utc::now();
        let r = BlobRef::heavy("s", BlobId::parse("a").unwrap(), metrics(), ts).unwrap();
        assert_eq!(
            r.timestamp.unwrap().timestamp_millis(),
            ts.timestamp_millis()
        );
        assert_eq!(r.timestamp.unwrap().timestamp_subsec_micros() % 1000, 0);
    }

    // -----------------------------------------------------------------------
    // Rejections
    // -----------------------------------------------------------------------

    #[test]
    fn parse_rejects_missing_store_name() {
        assert!(matches!(
            BlobRef::parse("@abc"),
            Err(AddressError::MissingStoreName(_))
        ));
        assert!(matches!(
            BlobRef::parse(""),
            Err(AddressError::MissingStoreName(_))
        ));
    }

    #[test]
    fn parse_rejects_missing_blob_id() {
        assert!(matches!(
            BlobRef::parse("store"),
            Err(AddressError::MissingBlobId(_))
        ));
        assert!(matches!(
            BlobRef::parse("store@"),
            Err(AddressError::MissingBlobId(_))
        ));
    }

    #[test]
    fn parse_rejects_invalid_blob_id() {
        assert!(matches!(
            BlobRef::parse("store@bad id"),
            Err(AddressError::InvalidBlobId { .. })
        ));
    }

    #[test]
    fn store_name_validation() {
        assert!(validate_store_name("artifacts-eu").is_ok());
        assert!(validate_store_name("with space ok").is_ok());
        assert!(validate_store_name("").is_err());
        assert!(validate_store_name("a@b").is_err());
        assert!(validate_store_name("a\tb").is_err());
    }

    // -----------------------------------------------------------------------
    // Permissive advisory segment
    // -----------------------------------------------------------------------

    #[test]
    fn malformed_timestamp_segment_parses_as_light() {
        for text in ["s@abc@not-a-number", "s@abc@", "s@abc@12.5"] {
            let r = BlobRef::parse(text).unwrap();
            assert_eq!(r.store, "s");
            assert_eq!(r.blob.as_str(), "abc");
            assert!(r.timestamp.is_none(), "{text:?} should drop the segment");
        }
    }

    #[test]
    fn out_of_range_timestamp_parses_as_light() {
        let r = BlobRef::parse(&format!("s@abc@{}", i64::MAX)).unwrap();
        assert!(r.timestamp.is_none());
    }
}
