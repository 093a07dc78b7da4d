//! Chart reference resolution

use std::path::{Path, PathBuf};
use std::time::Duration;

use semver::Version;
use tempfile::TempDir;

use crate::archive;
use crate::catalog::{CATALOG_SCHEME, Catalog};
use crate::error::{RepoError, Result};
use crate::genus::GenusAndVersion;

const USER_AGENT: &str = concat!("kdo/", env!("CARGO_PKG_VERSION"));

/// A chart available on local disk
#[derive(Debug)]
pub struct ResolvedChart {
    /// Chart directory
    pub path: PathBuf,
    pub genus: String,
    pub version: Option<Version>,
    // Extraction directory, removed on drop
    workdir: Option<TempDir>,
}

impl ResolvedChart {
    /// Whether the chart lives in a temporary extraction directory
    pub fn is_extracted(&self) -> bool {
        self.workdir.is_some()
    }
}

/// Turns chart references into chart directories
#[derive(Debug, Clone)]
pub struct Resolver {
    client: reqwest::Client,
    catalog_path: Option<PathBuf>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            catalog_path: None,
        }
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read catalog aliases from `path` instead of the default location
    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Resolve `reference` to a chart directory
    pub async fn resolve(&self, reference: &str) -> kdo_core::Result<ResolvedChart> {
        self.resolve_inner(reference)
            .await
            .map_err(|e| e.into_resolution(reference))
    }

    async fn resolve_inner(&self, reference: &str) -> Result<ResolvedChart> {
        let inferred = GenusAndVersion::infer(reference);

        if let Some(alias) = reference.strip_prefix(CATALOG_SCHEME) {
            let catalog = self.catalog()?;
            let target = catalog.lookup(alias)?;
            if target.starts_with(CATALOG_SCHEME) {
                return Err(RepoError::InvalidCatalog {
                    message: format!("alias '{}' refers to another alias", alias),
                });
            }
            tracing::debug!(alias, target, "catalog alias");
            let mut resolved = self.fetch(target).await?;
            resolved.genus = inferred.genus;
            return Ok(resolved);
        }

        let mut resolved = self.fetch(reference).await?;
        resolved.genus = inferred.genus;
        resolved.version = inferred.version;
        Ok(resolved)
    }

    async fn fetch(&self, reference: &str) -> Result<ResolvedChart> {
        let inferred = GenusAndVersion::infer(reference);
        let (path, workdir) = if is_url(reference) {
            let data = self.download(reference).await?;
            let workdir = TempDir::new()?;
            let root = archive::extract(&data, workdir.path())?;
            (root, Some(workdir))
        } else {
            let path = Path::new(reference);
            if path.is_dir() {
                (path.to_path_buf(), None)
            } else if path.is_file() {
                let data = tokio::fs::read(path).await?;
                let workdir = TempDir::new()?;
                let root = archive::extract(&data, workdir.path())?;
                (root, Some(workdir))
            } else {
                return Err(RepoError::NotFound {
                    path: reference.to_string(),
                });
            }
        };

        tracing::info!(
            reference,
            path = %path.display(),
            extracted = workdir.is_some(),
            "chart resolved"
        );
        Ok(ResolvedChart {
            path,
            genus: inferred.genus,
            version: inferred.version,
            workdir,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let url = url::Url::parse(url)?;
        tracing::info!(%url, "downloading chart");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        tracing::debug!(bytes = bytes.len(), "chart downloaded");
        Ok(bytes.to_vec())
    }

    fn catalog(&self) -> Result<Catalog> {
        match &self.catalog_path {
            Some(path) => Catalog::load_from(path),
            None => Catalog::load(),
        }
    }
}

fn is_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}
