//! Blob headers and the reserved header names.
//!
//! Headers are caller-supplied string pairs persisted in the blob sidecar
//! under the `header.` namespace. A handful of names are reserved for the
//! store itself; everything else passes through untouched.

use std::collections::BTreeMap;

/// Caller headers for one blob. A `BTreeMap` so sidecar writes are
/// deterministic.
pub type Headers = BTreeMap<String, String>;

/// Human-readable blob name (usually the artifact path).
pub const BLOB_NAME_HEADER: &str = "name";

/// Name of the repository the blob was written for.
pub const REPO_NAME_HEADER: &str = "repo-name";

/// MIME type of the content.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Marks a blob that has not yet been promoted to permanent.
pub const TEMPORARY_HEADER: &str = "temporary";

/// ETag reported by the cloud provider for the stored object.
pub const EXTERNAL_ETAG_HEADER: &str = "external-etag";

/// Last-Modified reported by the cloud provider for the stored object.
pub const EXTERNAL_LAST_MODIFIED_HEADER: &str = "external-last-modified";

/// Returns `true` if the headers carry the temporary marker.
pub fn is_temporary(headers: &Headers) -> bool {
    headers.contains_key(TEMPORARY_HEADER)
}
