//! A single Kubernetes manifest

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};

/// One Kubernetes object as produced by rendering or read from a cluster.
///
/// The body is opaque structured data; only `apiVersion`, `kind` and
/// `metadata` are interpreted. Objects are never mutated in place: the
/// builder methods consume the object and return a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object(JsonValue);

impl Object {
    /// Wrap a structured document. The document must be a mapping.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        if !value.is_object() {
            return Err(CoreError::InvalidObject {
                message: format!("expected a mapping, found {}", json_type_name(&value)),
            });
        }
        Ok(Self(value))
    }

    /// Build a minimal object with the given identity
    pub fn new(api_version: &str, kind: &str, name: &str) -> Self {
        Self(serde_json::json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": { "name": name },
        }))
    }

    pub fn kind(&self) -> &str {
        self.0.get("kind").and_then(JsonValue::as_str).unwrap_or_default()
    }

    pub fn api_version(&self) -> &str {
        self.0
            .get("apiVersion")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.metadata("name").unwrap_or_default()
    }

    /// Namespace, if the object carries one
    pub fn namespace(&self) -> Option<&str> {
        self.metadata("namespace").filter(|ns| !ns.is_empty())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.0
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(key))
            .and_then(JsonValue::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.0
            .pointer("/metadata/annotations")
            .and_then(|annotations| annotations.get(key))
            .and_then(JsonValue::as_str)
    }

    /// Look up a nested field by dotted path (e.g. `status.readyReplicas`)
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.0, |current, key| current.get(key))
    }

    pub fn body(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_value(self) -> JsonValue {
        self.0
    }

    /// Return this object with a top-level field set
    pub fn with_field(mut self, key: &str, value: JsonValue) -> Self {
        if let JsonValue::Object(root) = &mut self.0 {
            root.insert(key.to_string(), value);
        }
        self
    }

    /// Return this object placed in `namespace`
    pub fn with_namespace(self, namespace: &str) -> Self {
        self.with_metadata("namespace", JsonValue::String(namespace.to_string()))
    }

    /// Return this object with one more label
    pub fn with_label(self, key: &str, value: &str) -> Self {
        self.with_metadata_entry("labels", key, value)
    }

    /// Return this object with one more annotation
    pub fn with_annotation(self, key: &str, value: &str) -> Self {
        self.with_metadata_entry("annotations", key, value)
    }

    /// Return this object without the given annotation
    pub fn without_annotation(mut self, key: &str) -> Self {
        let now_empty = match self.0.pointer_mut("/metadata/annotations") {
            Some(JsonValue::Object(annotations)) => {
                annotations.remove(key);
                annotations.is_empty()
            }
            _ => false,
        };
        if now_empty {
            if let Some(JsonValue::Object(metadata)) = self.0.get_mut("metadata") {
                metadata.remove("annotations");
            }
        }
        self
    }

    /// Human-readable identity, e.g. `Deployment/web` or `Deployment/ns/web`
    pub fn id(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}/{}", self.kind(), ns, self.name()),
            None => format!("{}/{}", self.kind(), self.name()),
        }
    }

    fn metadata(&self, key: &str) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|meta| meta.get(key))
            .and_then(JsonValue::as_str)
    }

    fn with_metadata(mut self, key: &str, value: JsonValue) -> Self {
        if let JsonValue::Object(root) = &mut self.0 {
            let metadata = root
                .entry("metadata")
                .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
            if !metadata.is_object() {
                *metadata = JsonValue::Object(serde_json::Map::new());
            }
            if let JsonValue::Object(metadata) = metadata {
                metadata.insert(key.to_string(), value);
            }
        }
        self
    }

    fn with_metadata_entry(self, field: &str, key: &str, value: &str) -> Self {
        let mut entries = self
            .0
            .pointer(&format!("/metadata/{}", field))
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();
        entries.insert(key.to_string(), JsonValue::String(value.to_string()));
        self.with_metadata(field, JsonValue::Object(entries))
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind(), self.name())
    }
}

impl TryFrom<JsonValue> for Object {
    type Error = CoreError;

    fn try_from(value: JsonValue) -> Result<Self> {
        Self::from_value(value)
    }
}

pub(crate) fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        let obj = Object::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "shop",
                "labels": { "app": "web" },
                "annotations": { "kdo.io/rollout-status": "true" }
            },
            "spec": { "replicas": 3 }
        }))
        .unwrap();

        assert_eq!(obj.kind(), "Deployment");
        assert_eq!(obj.api_version(), "apps/v1");
        assert_eq!(obj.name(), "web");
        assert_eq!(obj.namespace(), Some("shop"));
        assert_eq!(obj.label("app"), Some("web"));
        assert_eq!(obj.annotation("kdo.io/rollout-status"), Some("true"));
        assert_eq!(obj.get("spec.replicas"), Some(&json!(3)));
        assert_eq!(obj.id(), "Deployment/shop/web");
        assert_eq!(obj.to_string(), "Deployment/web");
    }

    #[test]
    fn test_rejects_non_mapping() {
        let err = Object::from_value(json!(["a", "b"])).unwrap_err();
        assert!(err.to_string().contains("list"));
    }

    #[test]
    fn test_with_namespace_returns_new_object() {
        let original = Object::new("v1", "ConfigMap", "cfg");
        let placed = original.clone().with_namespace("team-a");

        assert_eq!(original.namespace(), None);
        assert_eq!(placed.namespace(), Some("team-a"));
    }

    #[test]
    fn test_annotation_roundtrip() {
        let obj = Object::new("v1", "ConfigMap", "cfg")
            .with_annotation("kdo.io/overlay", "merge")
            .with_label("app", "x");
        assert_eq!(obj.annotation("kdo.io/overlay"), Some("merge"));

        let stripped = obj.without_annotation("kdo.io/overlay");
        assert_eq!(stripped.annotation("kdo.io/overlay"), None);
        assert!(stripped.body().pointer("/metadata/annotations").is_none());
        assert_eq!(stripped.label("app"), Some("x"));
    }
}
