use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cask_types::{blob_ref::validate_store_name, HashAlgorithm};

use crate::error::{StoreError, StoreResult};
use crate::quota::{QuotaConfig, QuotaKind};

/// Attribute section for the file backend.
pub const FILE_SECTION: &str = "file";
/// Attribute section for the cloud backend.
pub const CLOUD_SECTION: &str = "cloud";
/// Attribute section for quota settings.
pub const QUOTA_SECTION: &str = "quota";

/// Static configuration for one blob store.
///
/// Changed only through administrative reconfiguration and read by the
/// backend at construction. `attributes` is a nested section → key → value
/// map; each backend reads its own section and ignores the rest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStoreConfiguration {
    /// Store name, unique within the deployment.
    pub name: String,
    /// Backend type: `"file"`, `"cloud"`, or `"memory"`.
    #[serde(rename = "type")]
    pub store_type: String,
    /// Nested backend/quota settings.
    #[serde(default)]
    pub attributes: BTreeMap<String, BTreeMap<String, String>>,
}

impl BlobStoreConfiguration {
    pub fn new(name: impl Into<String>, store_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store_type: store_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(
        mut self,
        section: &str,
        key: &str,
        value: impl Into<String>,
    ) -> Self {
        self.attributes
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }

    /// Look up one attribute.
    pub fn attribute(&self, section: &str, key: &str) -> Option<&str> {
        self.attributes
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// Validate the parts every backend relies on.
    pub fn validate(&self) -> StoreResult<()> {
        validate_store_name(&self.name)?;
        if self.store_type.is_empty() {
            return Err(StoreError::Config(format!(
                "store {:?} has no type",
                self.name
            )));
        }
        Ok(())
    }

    /// Root directory for the file backend.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.attribute(FILE_SECTION, "path").map(PathBuf::from)
    }

    /// Content-hash algorithm for `section`, defaulting to SHA-1.
    pub fn hash_algorithm(&self, section: &str) -> StoreResult<HashAlgorithm> {
        match self.attribute(section, "hash_algorithm") {
            None => Ok(HashAlgorithm::default()),
            Some(name) => Ok(HashAlgorithm::parse(name)?),
        }
    }

    /// Quota settings, or `None` when no quota is configured.
    pub fn quota(&self) -> StoreResult<Option<QuotaConfig>> {
        let Some(section) = self.attributes.get(QUOTA_SECTION) else {
            return Ok(None);
        };
        let kind = match section.get("kind").map(String::as_str) {
            None | Some("space-used") => QuotaKind::SpaceUsed,
            Some("blob-count") => QuotaKind::BlobCount,
            Some(other) => {
                return Err(StoreError::Config(format!(
                    "store {:?}: unknown quota kind {other:?}",
                    self.name
                )))
            }
        };
        let limit = section
            .get("limit")
            .ok_or_else(|| {
                StoreError::Config(format!("store {:?}: quota without a limit", self.name))
            })?
            .parse::<u64>()
            .map_err(|_| {
                StoreError::Config(format!("store {:?}: unreadable quota limit", self.name))
            })?;
        Ok(Some(QuotaConfig { kind, limit }))
    }
}

/// The administrator-maintained list of store configurations.
///
/// Persisted as TOML:
///
/// ```toml
/// [[stores]]
/// name = "default"
/// type = "file"
/// [stores.attributes.file]
/// path = "/var/lib/cask/default"
/// [stores.attributes.quota]
/// kind = "space-used"
/// limit = "10000000000"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCatalog {
    #[serde(default)]
    pub stores: Vec<BlobStoreConfiguration>,
}

impl StoreCatalog {
    /// Decode from TOML text, validating every entry and rejecting
    /// duplicate store names.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let catalog: Self =
            toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        let mut seen = std::collections::BTreeSet::new();
        for cfg in &catalog.stores {
            cfg.validate()?;
            if !seen.insert(cfg.name.clone()) {
                return Err(StoreError::Config(format!(
                    "duplicate store name {:?}",
                    cfg.name
                )));
            }
        }
        Ok(catalog)
    }

    /// Load and decode a catalog file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Encode to TOML text.
    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_config() -> BlobStoreConfiguration {
        BlobStoreConfiguration::new("default", "file")
            .with_attribute(FILE_SECTION, "path", "/var/lib/cask/default")
    }

    #[test]
    fn attribute_lookup() {
        let cfg = file_config();
        assert_eq!(
            cfg.attribute(FILE_SECTION, "path"),
            Some("/var/lib/cask/default")
        );
        assert_eq!(cfg.attribute(FILE_SECTION, "missing"), None);
        assert_eq!(cfg.attribute("nope", "path"), None);
    }

    #[test]
    fn file_path_accessor() {
        assert_eq!(
            file_config().file_path(),
            Some(PathBuf::from("/var/lib/cask/default"))
        );
        assert_eq!(BlobStoreConfiguration::new("x", "file").file_path(), None);
    }

    #[test]
    fn hash_algorithm_defaults_to_sha1() {
        assert_eq!(
            file_config().hash_algorithm(FILE_SECTION).unwrap(),
            HashAlgorithm::Sha1
        );
        let cfg = file_config().with_attribute(FILE_SECTION, "hash_algorithm", "sha256");
        assert_eq!(
            cfg.hash_algorithm(FILE_SECTION).unwrap(),
            HashAlgorithm::Sha256
        );
    }

    #[test]
    fn unknown_hash_algorithm_is_an_error() {
        let cfg = file_config().with_attribute(FILE_SECTION, "hash_algorithm", "md5");
        assert!(cfg.hash_algorithm(FILE_SECTION).is_err());
    }

    #[test]
    fn no_quota_section_means_none() {
        assert_eq!(file_config().quota().unwrap(), None);
    }

    #[test]
    fn quota_parsing() {
        let cfg = file_config()
            .with_attribute(QUOTA_SECTION, "kind", "space-used")
            .with_attribute(QUOTA_SECTION, "limit", "1000");
        assert_eq!(
            cfg.quota().unwrap(),
            Some(QuotaConfig {
                kind: QuotaKind::SpaceUsed,
                limit: 1000
            })
        );
    }

    #[test]
    fn quota_kind_defaults_to_space_used() {
        let cfg = file_config().with_attribute(QUOTA_SECTION, "limit", "5");
        assert_eq!(cfg.quota().unwrap().unwrap().kind, QuotaKind::SpaceUsed);
    }

    #[test]
    fn quota_without_limit_is_an_error() {
        let cfg = file_config().with_attribute(QUOTA_SECTION, "kind", "blob-count");
        assert!(matches!(cfg.quota(), Err(StoreError::Config(_))));
    }

    #[test]
    fn validate_rejects_bad_names() {
        let cfg = BlobStoreConfiguration::new("a@b", "file");
        assert!(cfg.validate().is_err());
        let cfg = BlobStoreConfiguration::new("ok", "");
        assert!(cfg.validate().is_err());
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    const CATALOG: &str = r#"
        [[stores]]
        name = "default"
        type = "file"
        [stores.attributes.file]
        path = "/var/lib/cask/default"
        [stores.attributes.quota]
        limit = "1000000"

        [[stores]]
        name = "scratch"
        type = "memory"
    "#;

    #[test]
    fn catalog_roundtrip() {
        let catalog = StoreCatalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.stores.len(), 2);
        assert_eq!(catalog.stores[0].name, "default");
        assert_eq!(catalog.stores[1].store_type, "memory");

        let text = catalog.to_toml_string().unwrap();
        assert_eq!(StoreCatalog::from_toml_str(&text).unwrap(), catalog);
    }

    #[test]
    fn catalog_rejects_duplicate_names() {
        let text = r#"
            [[stores]]
            name = "dup"
            type = "file"
            [[stores]]
            name = "dup"
            type = "memory"
        "#;
        assert!(matches!(
            StoreCatalog::from_toml_str(text),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn catalog_rejects_malformed_toml() {
        assert!(StoreCatalog::from_toml_str("not toml [").is_err());
    }
}
