//! Release information for templates and release records in the cluster

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::annotations;
use crate::error::{CoreError, Result};
use crate::jewel::dns_safe;
use crate::object::Object;

/// Release information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub is_install: bool,
    pub is_upgrade: bool,
    /// Name of the chart that owns the release
    pub service: String,
}

impl ReleaseInfo {
    /// Every kdo pass is rendered as an upgrade of revision 1
    pub fn for_chart(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision: 1,
            is_install: false,
            is_upgrade: true,
            service: name.to_string(),
        }
    }
}

/// What `kdo list` reports about an applied chart.
///
/// Persisted as a ConfigMap `kdo-release-<name>` in the chart namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub name: String,
    pub genus: String,
    pub namespace: String,
    pub version: Option<Version>,
    pub subcharts: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl ReleaseRecord {
    pub const PREFIX: &'static str = "kdo-release-";

    pub fn config_map_name(name: &str) -> String {
        dns_safe(&format!("{}{}", Self::PREFIX, name))
    }

    /// Selector matching every release record
    pub fn selector() -> String {
        format!("{}={}", annotations::MANAGED_BY_LABEL, annotations::MANAGED_BY)
    }

    pub fn to_object(&self) -> Object {
        let version = self
            .version
            .as_ref()
            .map(Version::to_string)
            .unwrap_or_default();
        Object::new("v1", "ConfigMap", &Self::config_map_name(&self.name))
            .with_namespace(&self.namespace)
            .with_label(annotations::MANAGED_BY_LABEL, annotations::MANAGED_BY)
            .with_annotation(annotations::GENUS, &self.genus)
            .with_field(
                "data",
                json!({
                    "name": self.name,
                    "genus": self.genus,
                    "namespace": self.namespace,
                    "version": version,
                    "subcharts": self.subcharts.join(","),
                    "updatedAt": self.updated_at.to_rfc3339(),
                }),
            )
    }

    pub fn from_object(object: &Object) -> Result<Self> {
        let field = |key: &str| -> Result<String> {
            object
                .get(&format!("data.{}", key))
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| CoreError::InvalidObject {
                    message: format!("release record {} has no '{}'", object.id(), key),
                })
        };

        let version = field("version")?;
        let version = if version.is_empty() {
            None
        } else {
            Some(Version::parse(&version)?)
        };
        let subcharts = field("subcharts")?;
        let updated_at = DateTime::parse_from_rfc3339(&field("updatedAt")?)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| CoreError::InvalidObject {
                message: format!("release record {}: {}", object.id(), e),
            })?;

        Ok(Self {
            name: field("name")?,
            genus: field("genus")?,
            namespace: field("namespace")?,
            version,
            subcharts: subcharts
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            updated_at,
        })
    }
}
