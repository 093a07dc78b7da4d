//! Chart catalog
//!
//! Maps short aliases to chart references. Stored in
//! `~/.config/kdo/catalog.yaml` (`$XDG_CONFIG_HOME` is honoured):
//!
//! ```yaml
//! istio: https://github.com/istio/istio/releases/download/1.22.0/istio-1.22.0.tgz
//! uaa: /srv/charts/uaa
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RepoError, Result};

/// Prefix of catalog references
pub const CATALOG_SCHEME: &str = "catalog:";

/// Alias table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: BTreeMap<String, String>,
}

impl Catalog {
    /// Load the catalog from its default location; a missing file is an
    /// empty catalog
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|e| RepoError::InvalidCatalog {
            message: format!("{}: {}", path.display(), e),
        })
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepoError::InvalidCatalog {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("kdo").join("catalog.yaml"))
    }

    pub fn insert(&mut self, alias: &str, reference: &str) {
        self.entries.insert(alias.to_string(), reference.to_string());
    }

    /// Reference registered for `alias`
    pub fn lookup(&self, alias: &str) -> Result<&str> {
        self.entries
            .get(alias)
            .map(String::as_str)
            .ok_or_else(|| RepoError::UnknownAlias {
                alias: alias.to_string(),
            })
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, "istio: https://example.com/istio-1.22.0.tgz\nuaa: /srv/uaa\n").unwrap();

        let catalog = Catalog::load_from(&path).unwrap();
        assert_eq!(catalog.lookup("uaa").unwrap(), "/srv/uaa");
        assert_eq!(catalog.aliases().collect::<Vec<_>>(), vec!["istio", "uaa"]);
        assert!(matches!(
            catalog.lookup("cf"),
            Err(RepoError::UnknownAlias { .. })
        ));
    }

    #[test]
    fn test_empty_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.yaml");
        std::fs::write(&empty, "\n").unwrap();
        assert_eq!(Catalog::load_from(&empty).unwrap(), Catalog::default());

        let invalid = dir.path().join("invalid.yaml");
        std::fs::write(&invalid, "- not\n- a map\n").unwrap();
        assert!(Catalog::load_from(&invalid).is_err());
    }
}
