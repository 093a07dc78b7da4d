//! Genus and version inference from chart references
//!
//! The genus names the family a chart belongs to, independent of its
//! version: every release of `github.com/sap/kdo` shares the genus
//! `github.com_sap_kdo`.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use url::Url;

use crate::catalog::CATALOG_SCHEME;

static GITHUB_RELEASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/([^/]+)/([^/]+)/releases/download/([^/]+)/").expect("valid regex")
});

static GITHUB_ARCHIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/([^/]+)/([^/]+)/archive/([^/]+)$").expect("valid regex"));

static GITHUB_API: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/api/v3/repos/([^/]+)/([^/]+)/(?:zipball|tarball)/([^/]+)$").expect("valid regex")
});

static VERSIONED_STEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)-(v?\d+(?:\.\d+){0,2}(?:[-+].*)?)$").expect("valid regex"));

const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".zip"];

/// Family and version of a chart reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenusAndVersion {
    pub genus: String,
    pub version: Option<Version>,
}

impl GenusAndVersion {
    /// Infer genus and version from a reference: a URL, a catalog alias or
    /// a local path
    pub fn infer(reference: &str) -> Self {
        if let Some(alias) = reference.strip_prefix(CATALOG_SCHEME) {
            return Self {
                genus: alias.to_string(),
                version: None,
            };
        }
        if (reference.starts_with("http://") || reference.starts_with("https://"))
            && let Ok(url) = Url::parse(reference)
        {
            return Self::from_url(&url);
        }
        Self::from_path(Path::new(reference))
    }

    fn from_url(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default();
        let path = url.path();
        let genus = |owner: &str, repo: &str| format!("{}_{}_{}", host, owner, repo);

        if let Some(c) = GITHUB_RELEASE.captures(path) {
            return Self {
                genus: genus(&c[1], &c[2]),
                version: parse_version(&c[3]),
            };
        }
        if let Some(c) = GITHUB_ARCHIVE.captures(path) {
            return Self {
                genus: genus(&c[1], &c[2]),
                version: parse_version(strip_archive_suffix(&c[3])),
            };
        }
        if let Some(c) = GITHUB_API.captures(path) {
            return Self {
                genus: genus(&c[1], &c[2]),
                version: parse_version(&c[3]),
            };
        }

        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let version = match segments.last() {
            Some(last) => parse_version(strip_archive_suffix(last)),
            None => None,
        };
        if version.is_some() {
            segments.pop();
        } else if let Some(last) = segments.last_mut() {
            *last = strip_archive_suffix(*last);
        }

        let mut genus = host.to_string();
        for segment in segments.into_iter().take(2) {
            genus.push('_');
            genus.push_str(segment);
        }
        Self { genus, version }
    }

    fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let stem = strip_archive_suffix(&name);

        if let Some(c) = VERSIONED_STEM.captures(stem)
            && let Some(version) = parse_version(&c[2])
        {
            return Self {
                genus: c[1].to_string(),
                version: Some(version),
            };
        }
        Self {
            genus: stem.to_string(),
            version: None,
        }
    }
}

/// Strip a known archive suffix
pub fn strip_archive_suffix(name: &str) -> &str {
    ARCHIVE_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(name)
}

/// Parse a version with an optional leading `v`. Missing minor and patch
/// components count as zero.
pub fn parse_version(s: &str) -> Option<Version> {
    let s = s.strip_prefix('v').unwrap_or(s);
    if let Ok(version) = Version::parse(s) {
        return Some(version);
    }
    let parts: Vec<&str> = s.split('.').collect();
    let numeric = |p: &&str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    if parts.len() > 2 || !parts.iter().all(numeric) {
        return None;
    }
    let padded = match parts.len() {
        1 => format!("{}.0.0", s),
        _ => format!("{}.0", s),
    };
    Version::parse(&padded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infer(reference: &str) -> (String, Option<String>) {
        let gv = GenusAndVersion::infer(reference);
        (gv.genus, gv.version.map(|v| v.to_string()))
    }

    #[test]
    fn test_github_release() {
        assert_eq!(
            infer("https://github.com/sap/kdo/releases/download/v0.6.1/kdo-0.6.1-dirty.tgz"),
            ("github.com_sap_kdo".to_string(), Some("0.6.1".to_string()))
        );
    }

    #[test]
    fn test_github_archive() {
        assert_eq!(
            infer("https://github.com/sap/kdo/archive/0.6.1.zip"),
            ("github.com_sap_kdo".to_string(), Some("0.6.1".to_string()))
        );
    }

    #[test]
    fn test_github_enterprise_zipball() {
        assert_eq!(
            infer("https://github.tools.sap/api/v3/repos/cki/cf-for-k8s-scp/zipball/v0.6.1"),
            (
                "github.tools.sap_cki_cf-for-k8s-scp".to_string(),
                Some("0.6.1".to_string())
            )
        );
    }

    #[test]
    fn test_other_url() {
        assert_eq!(
            infer("https://test.com/test/v0.6.1"),
            ("test.com_test".to_string(), Some("0.6.1".to_string()))
        );
        assert_eq!(
            infer("http://localhost:8675/uaa.tgz"),
            ("localhost_uaa".to_string(), None)
        );
        assert_eq!(
            infer("https://example.com/org/repo/charts/v1.2.3"),
            ("example.com_org_repo".to_string(), Some("1.2.3".to_string()))
        );
        assert_eq!(
            infer("https://example.com/org/repo/charts/uaa.tgz"),
            ("example.com_org_repo".to_string(), None)
        );
    }

    #[test]
    fn test_catalog() {
        assert_eq!(infer("catalog:istio"), ("istio".to_string(), None));
    }

    #[test]
    fn test_local_paths() {
        assert_eq!(
            infer("charts/example/uaa-1.3.4.tgz"),
            ("uaa".to_string(), Some("1.3.4".to_string()))
        );
        assert_eq!(infer("charts/example/uaa"), ("uaa".to_string(), None));
        assert_eq!(
            infer("/tmp/cf-for-k8s-v2.1.zip"),
            ("cf-for-k8s".to_string(), Some("2.1.0".to_string()))
        );
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("v1"), Some(Version::new(1, 0, 0)));
        assert_eq!(parse_version("1.2.3-rc.1").unwrap().pre.as_str(), "rc.1");
        assert_eq!(parse_version("latest"), None);
        assert_eq!(parse_version("1..2"), None);
    }
}
