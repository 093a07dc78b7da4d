//! Per-call options for cluster operations

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};

/// Options accepted by every cluster operation.
///
/// Each call gets its own value; handles never share mutable defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Whether the target kind is namespaced
    pub namespaced: bool,

    /// Treat a missing object as success
    pub ignore_not_found: bool,

    /// Namespace override for this call
    pub namespace: Option<String>,

    /// Upper bound for blocking operations; zero means unbounded
    pub timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            namespaced: true,
            ignore_not_found: false,
            namespace: None,
            timeout: Duration::ZERO,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster_scoped(mut self) -> Self {
        self.namespaced = false;
        self
    }

    pub fn ignoring_not_found(mut self) -> Self {
        self.ignore_not_found = true;
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The timeout, or `None` when unbounded
    pub fn deadline(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Namespace to use for a call given the handle's own namespace.
    ///
    /// Cluster-scoped calls have no namespace.
    pub fn effective_namespace<'a>(&'a self, scoped: &'a str) -> Option<&'a str> {
        if !self.namespaced {
            return None;
        }
        Some(self.namespace.as_deref().unwrap_or(scoped))
    }

    /// Parse keyword arguments as passed from templates and extensions.
    ///
    /// Accepted keys: `namespaced`, `ignore_not_found`, `namespace`,
    /// `timeout` (seconds).
    pub fn from_kwargs(kwargs: &JsonValue) -> Result<Self> {
        let mut options = Self::default();
        let map = match kwargs {
            JsonValue::Null => return Ok(options),
            JsonValue::Object(map) => map,
            other => {
                return Err(CoreError::InvalidOptions {
                    message: format!("expected keyword arguments, got {}", other),
                });
            }
        };

        for (key, value) in map {
            match key.as_str() {
                "namespaced" => options.namespaced = expect_bool(key, value)?,
                "ignore_not_found" => options.ignore_not_found = expect_bool(key, value)?,
                "namespace" => {
                    options.namespace = match value {
                        JsonValue::Null => None,
                        JsonValue::String(ns) => Some(ns.clone()),
                        _ => return Err(invalid(key, "a string")),
                    }
                }
                "timeout" => {
                    let seconds = value.as_u64().ok_or_else(|| invalid(key, "whole seconds"))?;
                    options.timeout = Duration::from_secs(seconds);
                }
                other => {
                    return Err(CoreError::InvalidOptions {
                        message: format!("unknown option '{}'", other),
                    });
                }
            }
        }
        Ok(options)
    }
}

fn expect_bool(key: &str, value: &JsonValue) -> Result<bool> {
    value.as_bool().ok_or_else(|| invalid(key, "a boolean"))
}

fn invalid(key: &str, expected: &str) -> CoreError {
    CoreError::InvalidOptions {
        message: format!("option '{}' must be {}", key, expected),
    }
}

/// Patch flavours supported by `Cluster::patch`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchType {
    /// JSON merge patch (RFC 7386)
    #[default]
    Merge,
    /// Kubernetes strategic merge patch
    Strategic,
}

impl std::str::FromStr for PatchType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "merge" => Ok(Self::Merge),
            "strategic" => Ok(Self::Strategic),
            other => Err(CoreError::InvalidOptions {
                message: format!("unsupported patch type '{}'", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let opts = Options::default();
        assert!(opts.namespaced);
        assert!(!opts.ignore_not_found);
        assert_eq!(opts.deadline(), None);
        assert_eq!(opts.effective_namespace("team"), Some("team"));
    }

    #[test]
    fn test_from_kwargs() {
        let opts = Options::from_kwargs(&json!({
            "namespace": "other",
            "ignore_not_found": true,
            "timeout": 30
        }))
        .unwrap();

        assert_eq!(opts.effective_namespace("team"), Some("other"));
        assert!(opts.ignore_not_found);
        assert_eq!(opts.deadline(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_cluster_scoped_has_no_namespace() {
        let opts = Options::new().cluster_scoped().in_namespace("ignored");
        assert_eq!(opts.effective_namespace("team"), None);
    }

    #[test]
    fn test_from_kwargs_rejects_unknown() {
        assert!(Options::from_kwargs(&json!({ "namspace": "typo" })).is_err());
        assert!(Options::from_kwargs(&json!({ "timeout": "soon" })).is_err());
    }

    #[test]
    fn test_patch_type_parse() {
        assert_eq!("merge".parse::<PatchType>().unwrap(), PatchType::Merge);
        assert!("json".parse::<PatchType>().is_err());
    }
}
