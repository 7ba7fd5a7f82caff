//! The durable per-blob sidecar record and its text codec.
//!
//! Every blob is paired with an attributes record holding its headers,
//! metrics, and deletion state. The record is persisted in a
//! Java-Properties-equivalent `key=value` text format so operators can read
//! and repair it with nothing but a text editor:
//!
//! ```text
//! #cask blob store attributes
//! creationTime=1715000000000
//! header.content-type=application/java-archive
//! header.name=org/example/app/1.0/app-1.0.jar
//! sha1=da39a3ee5e6b4b0d3255bfef95601890afd80709
//! size=1024
//! ```
//!
//! Keys are written in sorted order so rewrites are deterministic. Values
//! are backslash-escaped (`\n`, `\r`, `\t`, `\\`, `\=`, `\:`, leading
//! spaces and comment markers). `deleted=true` with the content bytes still
//! present is the soft-delete state; hard deletion removes record and bytes
//! together.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use cask_types::{BlobMetrics, HashAlgorithm, Headers};

use crate::error::{StoreError, StoreResult};

const CREATION_TIME_KEY: &str = "creationTime";
const SIZE_KEY: &str = "size";
const DELETED_KEY: &str = "deleted";
const DELETED_REASON_KEY: &str = "deletedReason";
const DELETED_DATETIME_KEY: &str = "deletedDateTime";
const HEADER_PREFIX: &str = "header.";
const COMMENT_LINE: &str = "#cask blob store attributes";

/// Durable sidecar metadata for one blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobAttributes {
    /// Caller headers plus system-reserved entries.
    pub headers: Headers,
    /// Size / hash / creation-time snapshot.
    pub metrics: BlobMetrics,
    /// Soft-delete flag. Bytes remain on disk while this is set.
    pub deleted: bool,
    /// Why the blob was soft-deleted.
    pub deleted_reason: Option<String>,
    /// When the blob was soft-deleted.
    pub deleted_datetime: Option<DateTime<Utc>>,
}

impl BlobAttributes {
    /// A fresh, live record.
    pub fn new(headers: Headers, metrics: BlobMetrics) -> Self {
        Self {
            headers,
            metrics,
            deleted: false,
            deleted_reason: None,
            deleted_datetime: None,
        }
    }

    /// Returns `true` while the headers carry the temporary marker.
    pub fn is_temporary(&self) -> bool {
        cask_types::headers::is_temporary(&self.headers)
    }

    /// Flip the record into the soft-deleted state.
    pub fn mark_deleted(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.deleted = true;
        self.deleted_reason = Some(reason.into());
        self.deleted_datetime = Some(at);
    }

    /// Serialize to the sidecar text format.
    pub fn to_properties(&self) -> String {
        let mut entries: BTreeMap<String, String> = BTreeMap::new();
        entries.insert(
            CREATION_TIME_KEY.to_string(),
            self.metrics.creation_time.timestamp_millis().to_string(),
        );
        entries.insert(SIZE_KEY.to_string(), self.metrics.size.to_string());
        entries.insert(
            self.metrics.algorithm.property_key().to_string(),
            self.metrics.hash.clone(),
        );
        if self.deleted {
            entries.insert(DELETED_KEY.to_string(), "true".to_string());
        }
        if let Some(reason) = &self.deleted_reason {
            entries.insert(DELETED_REASON_KEY.to_string(), reason.clone());
        }
        if let Some(at) = self.deleted_datetime {
            entries.insert(
                DELETED_DATETIME_KEY.to_string(),
                at.timestamp_millis().to_string(),
            );
        }
        for (name, value) in &self.headers {
            entries.insert(format!("{HEADER_PREFIX}{name}"), value.clone());
        }

        let mut out = String::from(COMMENT_LINE);
        out.push('\n');
        for (key, value) in entries {
            out.push_str(&escape(&key, true));
            out.push('=');
            out.push_str(&escape(&value, false));
            out.push('\n');
        }
        out
    }

    /// Decode the sidecar text format.
    pub fn parse_properties(text: &str) -> StoreResult<Self> {
        let mut entries: BTreeMap<String, String> = BTreeMap::new();
        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = split_line(line)?;
            entries.insert(key, value);
        }

        let creation_time = entries
            .get(CREATION_TIME_KEY)
            .ok_or_else(|| StoreError::Attributes(format!("missing {CREATION_TIME_KEY}")))?
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| StoreError::Attributes(format!("unreadable {CREATION_TIME_KEY}")))?;
        let size = entries
            .get(SIZE_KEY)
            .ok_or_else(|| StoreError::Attributes(format!("missing {SIZE_KEY}")))?
            .parse::<u64>()
            .map_err(|_| StoreError::Attributes(format!("unreadable {SIZE_KEY}")))?;

        let (algorithm, hash) = [HashAlgorithm::Sha1, HashAlgorithm::Sha256]
            .into_iter()
            .find_map(|a| entries.get(a.property_key()).map(|h| (a, h.clone())))
            .ok_or_else(|| StoreError::Attributes("missing content digest".to_string()))?;

        let deleted = entries.get(DELETED_KEY).map(String::as_str) == Some("true");
        let deleted_reason = entries.get(DELETED_REASON_KEY).cloned();
        let deleted_datetime = entries
            .get(DELETED_DATETIME_KEY)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);

        let mut headers = Headers::new();
        for (key, value) in &entries {
            if let Some(name) = key.strip_prefix(HEADER_PREFIX) {
                headers.insert(name.to_string(), value.clone());
            }
        }

        Ok(Self {
            headers,
            metrics: BlobMetrics::new(size, hash, algorithm, creation_time),
            deleted,
            deleted_reason,
            deleted_datetime,
        })
    }
}

/// Escape one key or value. Keys escape every space; values only a leading
/// one.
fn escape(s: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '=' => out.push_str("\\="),
            ':' => out.push_str("\\:"),
            '#' | '!' if i == 0 => {
                out.push('\\');
                out.push(c);
            }
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            _ => out.push(c),
        }
    }
    out
}

/// Split a line at the first unescaped `=` or `:` and unescape both halves.
fn split_line(line: &str) -> StoreResult<(String, String)> {
    let mut sep = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                sep = Some(i);
                break;
            }
            _ => {}
        }
    }
    let (raw_key, raw_value) = match sep {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => (line, ""),
    };
    let key = unescape(trim_unescaped_trailing_spaces(raw_key))?;
    let value = unescape(raw_value.trim_start_matches(' '))?;
    if key.is_empty() {
        return Err(StoreError::Attributes(format!("line without key: {line:?}")));
    }
    Ok((key, value))
}

fn unescape(s: &str) -> StoreResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut it = s.chars();
    while let Some(c) = it.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match it.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {
                return Err(StoreError::Attributes(format!(
                    "dangling escape in {s:?}"
                )))
            }
        }
    }
    Ok(out)
}

/// Trim trailing spaces that are not themselves escaped.
fn trim_unescaped_trailing_spaces(s: &str) -> &str {
    let bytes = s.as_bytes();
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == b' ' {
        let mut backslashes = 0;
        let mut i = end - 1;
        while i > 0 && bytes[i - 1] == b'\\' {
            backslashes += 1;
            i -= 1;
        }
        if backslashes % 2 == 1 {
            break;
        }
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_types::headers::TEMPORARY_HEADER;

    fn sample_metrics() -> BlobMetrics {
        BlobMetrics::new(
            1024,
            "da39a3ee5e6b4b0d3255bfef95601890afd80709",
            HashAlgorithm::Sha1,
            DateTime::from_timestamp_millis(1_715_000_000_000).unwrap(),
        )
    }

    fn sample_headers() -> Headers {
        let mut h = Headers::new();
        h.insert("name".to_string(), "org/example/app-1.0.jar".to_string());
        h.insert("repo-name".to_string(), "releases".to_string());
        h.insert(
            "content-type".to_string(),
            "application/java-archive".to_string(),
        );
        h
    }

    // -----------------------------------------------------------------------
    // Round trips
    // -----------------------------------------------------------------------

    #[test]
    fn live_record_roundtrip() {
        let attrs = BlobAttributes::new(sample_headers(), sample_metrics());
        let text = attrs.to_properties();
        let back = BlobAttributes::parse_properties(&text).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn soft_deleted_record_roundtrip() {
        let mut attrs = BlobAttributes::new(sample_headers(), sample_metrics());
        attrs.mark_deleted(
            "removed by administrator",
            DateTime::from_timestamp_millis(1_715_000_360_000).unwrap(),
        );
        let text = attrs.to_properties();
        assert!(text.contains("deleted=true"));
        let back = BlobAttributes::parse_properties(&text).unwrap();
        assert!(back.deleted);
        assert_eq!(back.deleted_reason.as_deref(), Some("removed by administrator"));
        assert_eq!(
            back.deleted_datetime.unwrap().timestamp_millis(),
            1_715_000_360_000
        );
    }

    #[test]
    fn sha256_record_roundtrip() {
        let metrics = BlobMetrics::new(
            7,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            HashAlgorithm::Sha256,
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        );
        let attrs = BlobAttributes::new(Headers::new(), metrics);
        let text = attrs.to_properties();
        assert!(text.contains("sha256="));
        let back = BlobAttributes::parse_properties(&text).unwrap();
        assert_eq!(back.metrics.algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn hostile_header_values_roundtrip() {
        let mut headers = Headers::new();
        headers.insert("name".to_string(), "a=b:c\nd\te \\weird".to_string());
        headers.insert("spaced key".to_string(), " leading space".to_string());
        headers.insert("#hash".to_string(), "!bang".to_string());
        headers.insert("unicode".to_string(), "höhe-メタ".to_string());
        let attrs = BlobAttributes::new(headers, sample_metrics());
        let back = BlobAttributes::parse_properties(&attrs.to_properties()).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn temporary_marker_detection() {
        let mut headers = sample_headers();
        headers.insert(TEMPORARY_HEADER.to_string(), "true".to_string());
        let attrs = BlobAttributes::new(headers, sample_metrics());
        assert!(attrs.is_temporary());
        let back = BlobAttributes::parse_properties(&attrs.to_properties()).unwrap();
        assert!(back.is_temporary());
    }

    // -----------------------------------------------------------------------
    // Decode failures and permissiveness
    // -----------------------------------------------------------------------

    #[test]
    fn missing_creation_time_is_an_error() {
        let text = "size=10\nsha1=ab\n";
        assert!(matches!(
            BlobAttributes::parse_properties(text),
            Err(StoreError::Attributes(_))
        ));
    }

    #[test]
    fn missing_size_is_an_error() {
        let text = "creationTime=1000\nsha1=ab\n";
        assert!(BlobAttributes::parse_properties(text).is_err());
    }

    #[test]
    fn missing_digest_is_an_error() {
        let text = "creationTime=1000\nsize=10\n";
        assert!(BlobAttributes::parse_properties(text).is_err());
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "#comment\n!also a comment\n\ncreationTime=1000\nsize=10\nsha1=ab\n";
        let attrs = BlobAttributes::parse_properties(text).unwrap();
        assert_eq!(attrs.metrics.size, 10);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let text = "creationTime=1000\nsize=10\nsha1=ab\nfutureKey=whatever\n";
        let attrs = BlobAttributes::parse_properties(text).unwrap();
        assert!(attrs.headers.is_empty());
    }

    #[test]
    fn colon_separator_is_accepted() {
        let text = "creationTime:1000\nsize:10\nsha1:ab\nheader.name:x\n";
        let attrs = BlobAttributes::parse_properties(text).unwrap();
        assert_eq!(attrs.headers.get("name").map(String::as_str), Some("x"));
    }

    #[test]
    fn spaces_around_separator_are_tolerated() {
        let text = "creationTime = 1000\nsize = 10\nsha1 = ab\n";
        let attrs = BlobAttributes::parse_properties(text).unwrap();
        assert_eq!(attrs.metrics.size, 10);
        assert_eq!(attrs.metrics.hash, "ab");
    }

    #[test]
    fn output_is_deterministic() {
        let attrs = BlobAttributes::new(sample_headers(), sample_metrics());
        assert_eq!(attrs.to_properties(), attrs.to_properties());
    }
}
