//! Chart manifests and loaded chart trees
//!
//! A chart on disk:
//!
//! ```text
//! mychart/
//!   Chart.yaml          # manifest
//!   values.yaml         # default values
//!   templates/          # per-file templates
//!   overlay-templates/  # optional overlay pass
//!   charts/<sub>/       # sub-charts, same layout
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::jewel::Jewel;
use crate::method::ChartMethod;
use crate::value::MethodRef;
use crate::values::Values;

pub const CHART_FILE: &str = "Chart.yaml";
pub const VALUES_FILE: &str = "values.yaml";
pub const TEMPLATES_DIR: &str = "templates";
pub const OVERLAY_DIR: &str = "overlay-templates";
pub const CHARTS_DIR: &str = "charts";

/// The method every chart renders through
pub const TEMPLATE_METHOD: &str = "template";

/// Contents of `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartManifest {
    pub name: String,

    pub version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Namespace the chart is applied to; defaults to the chart name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Sub-chart order, by directory name under `charts/`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcharts: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jewels: Vec<JewelSpec>,

    /// Named methods bound from extension modules
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub methods: IndexMap<String, MethodRef>,

    /// Workloads whose rollout must complete after apply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness: Vec<ReadinessCheck>,
}

/// Declaration of a jewel in `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JewelSpec {
    pub name: String,

    /// `prompt`, `generated`, or `@extension:<module>.<member>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Prompt type: string, password, bool or selection
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Allowed answers of a selection prompt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,

    /// Keys to fill; defaults to a single `value` key
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,

    /// Free-form parameters for extension backends
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub params: JsonValue,
}

impl JewelSpec {
    pub const DEFAULT_KEY: &'static str = "value";

    pub fn keys(&self) -> Vec<String> {
        if self.keys.is_empty() {
            vec![Self::DEFAULT_KEY.to_string()]
        } else {
            self.keys.clone()
        }
    }

    /// Backend name, inferred from the other fields when not given
    pub fn backend_name(&self) -> &str {
        match (&self.backend, &self.kind) {
            (Some(backend), _) => backend.as_str(),
            (None, Some(_)) => "prompt",
            (None, None) => "generated",
        }
    }
}

/// A workload to wait for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessCheck {
    pub kind: String,
    pub name: String,
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl ChartManifest {
    pub fn load(chart_dir: &Path) -> Result<Self> {
        let path = chart_dir.join(CHART_FILE);
        if !path.exists() {
            return Err(CoreError::InvalidChart {
                path: chart_dir.display().to_string(),
                message: format!("{} not found", CHART_FILE),
            });
        }
        let content = std::fs::read_to_string(&path)?;
        let manifest = Self::from_yaml(&content).map_err(|e| CoreError::InvalidChart {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(manifest)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(yaml)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| CoreError::InvalidChart {
            path: self.name.clone(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for jewel in &self.jewels {
            if !seen.insert(jewel.name.as_str()) {
                return Err(invalid(format!("jewel '{}' declared twice", jewel.name)));
            }
            if jewel.kind.as_deref() == Some("selection") && jewel.options.is_empty() {
                return Err(invalid(format!(
                    "selection jewel '{}' needs options",
                    jewel.name
                )));
            }
        }
        Ok(())
    }

    /// Namespace used when nobody overrides it
    pub fn default_namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(&self.name)
    }

    /// Namespace of this chart as a sub-chart of a chart living in
    /// `parent`: the declared one, else `<parent>-<name>`
    pub fn subchart_namespace(&self, parent: &str) -> String {
        match &self.namespace {
            Some(namespace) => namespace.clone(),
            None => format!("{}-{}", parent, self.name),
        }
    }
}

/// Sub-chart directories of a chart, in apply order.
///
/// With an explicit `subcharts` list the order is the declared one and every
/// entry must exist; otherwise every directory under `charts/` holding a
/// `Chart.yaml` is used, sorted by name.
pub fn subchart_dirs(chart_dir: &Path, manifest: &ChartManifest) -> Result<Vec<PathBuf>> {
    let charts_dir = chart_dir.join(CHARTS_DIR);

    if !manifest.subcharts.is_empty() {
        return manifest
            .subcharts
            .iter()
            .map(|name| {
                let dir = charts_dir.join(name);
                if dir.join(CHART_FILE).exists() {
                    Ok(dir)
                } else {
                    Err(CoreError::InvalidChart {
                        path: chart_dir.display().to_string(),
                        message: format!("sub-chart '{}' not found under {}", name, CHARTS_DIR),
                    })
                }
            })
            .collect();
    }

    if !charts_dir.is_dir() {
        return Ok(Vec::new());
    }

    Ok(walkdir::WalkDir::new(&charts_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.path().join(CHART_FILE).exists())
        .map(|e| e.into_path())
        .collect())
}

/// A loaded chart with its sub-charts, values, methods and jewels
#[derive(Clone)]
pub struct Chart {
    pub manifest: ChartManifest,
    /// Directory the chart was loaded from
    pub root: PathBuf,
    /// Namespace this chart is applied to
    pub namespace: String,
    /// Merged values
    pub values: Values,
    /// Sub-charts in apply order
    pub subcharts: Vec<Chart>,
    pub methods: IndexMap<String, Arc<dyn ChartMethod>>,
    pub jewels: Vec<Jewel>,
}

impl Chart {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> &Version {
        &self.manifest.version
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn method(&self, name: &str) -> Option<&Arc<dyn ChartMethod>> {
        self.methods.get(name)
    }

    pub fn jewel(&self, name: &str) -> Option<&Jewel> {
        self.jewels.iter().find(|j| j.name() == name)
    }

    /// Every chart of the tree, sub-charts before their owner
    pub fn walk(&self) -> Vec<&Chart> {
        let mut charts = Vec::new();
        for sub in &self.subcharts {
            charts.extend(sub.walk());
        }
        charts.push(self);
        charts
    }

    /// Resolved jewel values, keyed by jewel name
    pub fn jewel_values(&self) -> JsonValue {
        let map = self
            .jewels
            .iter()
            .filter_map(|jewel| {
                let value = jewel.value()?;
                let entries = value
                    .iter()
                    .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
                    .collect();
                Some((jewel.name().to_string(), JsonValue::Object(entries)))
            })
            .collect();
        JsonValue::Object(map)
    }
}

impl fmt::Debug for Chart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chart")
            .field("name", &self.manifest.name)
            .field("version", &self.manifest.version.to_string())
            .field("namespace", &self.namespace)
            .field("root", &self.root)
            .field("subcharts", &self.subcharts)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("jewels", &self.jewels)
            .finish()
    }
}
