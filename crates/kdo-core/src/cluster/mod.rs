//! The cluster capability
//!
//! Every render and apply pass talks to a cluster through [`Cluster`]. A
//! handle is scoped to one chart: [`Cluster::for_sub_chart`] derives a new
//! handle for a sub-chart without touching the parent's configuration.

mod memory;
pub mod readiness;

pub use memory::{FailureRule, InMemoryCluster, OperationCounts};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::object::Object;
use crate::options::{Options, PatchType};
use crate::stream::ObjectStream;

/// Kinds that never live in a namespace
pub const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PriorityClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
];

pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(kind))
}

/// How objects are written to the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Server-side apply with forced field ownership
    #[default]
    ServerSide,
    /// Create, or replace the whole object when it exists
    Replace,
}

impl Tool {
    pub const ALL: &'static [Tool] = &[Tool::ServerSide, Tool::Replace];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::ServerSide => "server-side",
            Tool::Replace => "replace",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Tool::ALL
            .iter()
            .copied()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| CoreError::InvalidOptions {
                message: format!(
                    "unknown tool '{}' (expected one of: server-side, replace)",
                    s
                ),
            })
    }
}

/// Configuration carried by a cluster handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterScope {
    /// Namespace objects without one are placed in
    pub namespace: String,
    /// Chart (release) this handle was scoped to
    pub release: Option<String>,
    pub version: Option<Version>,
    /// Number of sub-charts the scoped chart declares
    pub subcharts: usize,
    pub tool: Tool,
}

impl ClusterScope {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            release: None,
            version: None,
            subcharts: 0,
            tool: Tool::default(),
        }
    }

    /// Scope for a sub-chart. The tool is inherited.
    pub fn for_sub_chart(
        &self,
        namespace: &str,
        release: &str,
        version: &Version,
        subcharts: usize,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            release: Some(release.to_string()),
            version: Some(version.clone()),
            subcharts,
            tool: self.tool,
        }
    }

    pub fn with_tool(&self, tool: Tool) -> Self {
        Self {
            tool,
            ..self.clone()
        }
    }
}

/// Operations a chart can perform against a cluster
#[async_trait]
pub trait Cluster: Send + Sync {
    /// API server address
    fn host(&self) -> &str;

    fn scope(&self) -> &ClusterScope;

    fn namespace(&self) -> &str {
        &self.scope().namespace
    }

    fn tool(&self) -> Tool {
        self.scope().tool
    }

    /// A handle sharing this transport but applying with `tool`
    fn with_tool(&self, tool: Tool) -> Arc<dyn Cluster>;

    /// A handle scoped to a sub-chart and its namespace
    fn for_sub_chart(
        &self,
        namespace: &str,
        release: &str,
        version: &Version,
        subcharts: usize,
    ) -> Arc<dyn Cluster>;

    /// Apply every object of the stream, in order. Objects without a
    /// namespace land in the handle's namespace (or the options override).
    async fn apply(&self, stream: ObjectStream, options: &Options) -> Result<()>;

    /// Fetch one object. Missing objects are `NotFound`, or `None` with
    /// `ignore_not_found`.
    async fn get(&self, kind: &str, name: &str, options: &Options) -> Result<Option<Object>>;

    /// List objects of a kind, optionally filtered by a label selector
    /// (`key=value[,key=value]`)
    async fn list(
        &self,
        kind: &str,
        selector: Option<&str>,
        options: &Options,
    ) -> Result<Vec<Object>>;

    async fn patch(
        &self,
        kind: &str,
        name: &str,
        patch: &JsonValue,
        patch_type: PatchType,
        options: &Options,
    ) -> Result<Option<Object>>;

    async fn delete(&self, kind: &str, name: &str, options: &Options) -> Result<()>;

    /// Every version of the named object as it changes. The stream ends
    /// when the watch ends or its timeout expires.
    fn watch(&self, kind: &str, name: &str, options: &Options) -> ObjectStream;

    /// Block until the workload's rollout completes
    async fn rollout_status(&self, kind: &str, name: &str, options: &Options) -> Result<()>;

    /// Block until the object reports `condition` as true
    async fn wait(&self, kind: &str, name: &str, condition: &str, options: &Options)
    -> Result<()>;
}

/// Parse a `key=value[,key=value]` label selector
pub fn parse_selector(selector: &str) -> Result<Vec<(String, String)>> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            term.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| CoreError::InvalidOptions {
                    message: format!("unsupported selector term '{}'", term),
                })
        })
        .collect()
}
