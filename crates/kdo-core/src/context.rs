//! Template rendering context

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::chart::{Chart, ChartManifest};
use crate::release::ReleaseInfo;

/// Data every per-file template sees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    /// Merged values
    pub values: JsonValue,

    pub release: ReleaseInfo,

    pub chart: ChartInfo,

    pub capabilities: Capabilities,

    pub template: TemplateInfo,
}

/// Chart information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
    pub api_version: String,
}

impl From<&ChartManifest> for ChartInfo {
    fn from(manifest: &ChartManifest) -> Self {
        Self {
            name: manifest.name.clone(),
            version: manifest.version.to_string(),
            app_version: manifest.app_version.clone(),
            api_version: "v2".to_string(),
        }
    }
}

/// Cluster capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub kube_version: KubeVersion,
    pub api_versions: Vec<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            kube_version: KubeVersion::default(),
            api_versions: vec!["v1".to_string()],
        }
    }
}

/// Kubernetes version info
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeVersion {
    pub version: String,
    pub git_version: String,
    pub major: String,
    pub minor: String,
}

impl Default for KubeVersion {
    fn default() -> Self {
        Self::new("v1.31.0")
    }
}

impl KubeVersion {
    pub fn new(version: &str) -> Self {
        let version = version.trim_start_matches('v');
        let mut parts = version.split('.');
        let major = parts.next().unwrap_or("1").to_string();
        let minor = parts.next().unwrap_or("31").to_string();

        Self {
            version: format!("v{}", version),
            git_version: format!("v{}", version),
            major,
            minor,
        }
    }
}

/// Current template information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInfo {
    pub name: String,
    pub base_path: String,
}

impl Default for TemplateInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_path: ".".to_string(),
        }
    }
}

impl TemplateContext {
    pub fn for_chart(chart: &Chart) -> Self {
        Self {
            values: chart.values.inner().clone(),
            release: ReleaseInfo::for_chart(chart.name(), &chart.namespace),
            chart: ChartInfo::from(&chart.manifest),
            capabilities: Capabilities::default(),
            template: TemplateInfo::default(),
        }
    }

    /// Set the current template info
    pub fn with_template(mut self, name: &str) -> Self {
        self.template.name = name.to_string();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Convert to a minijinja-compatible context
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kube_version() {
        let v = KubeVersion::new("1.29.3");
        assert_eq!(v.version, "v1.29.3");
        assert_eq!(v.major, "1");
        assert_eq!(v.minor, "29");
    }

    #[test]
    fn test_context_json_shape() {
        let manifest = ChartManifest::from_yaml("name: uaa\nversion: 2.1.0\n").unwrap();
        let chart = Chart {
            manifest,
            root: std::path::PathBuf::from("."),
            namespace: "uaa".to_string(),
            values: crate::values::Values::from_yaml("replicas: 2").unwrap(),
            subcharts: vec![],
            methods: Default::default(),
            jewels: vec![],
        };

        let json = TemplateContext::for_chart(&chart).to_json();
        assert_eq!(json["values"]["replicas"], 2);
        assert_eq!(json["release"]["isUpgrade"], true);
        assert_eq!(json["release"]["revision"], 1);
        assert_eq!(json["chart"]["version"], "2.1.0");
        assert_eq!(json["capabilities"]["apiVersions"][0], "v1");
        assert_eq!(json["template"]["basePath"], ".");
    }
}
