//! Chart values
//!
//! A chart's values are its `values.yaml` with caller overrides merged on
//! top. Maps merge key by key; any other value, arrays included, replaces
//! what was there.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{CoreError, Result};

/// Key whose contents every sub-chart sees unchanged
pub const GLOBAL_KEY: &str = "global";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    pub fn new() -> Self {
        Self(JsonValue::Object(Map::new()))
    }

    /// `path` parsed as YAML, or empty values when there is no such file
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// An empty or comment-only document is empty values
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        match serde_yaml::from_str::<JsonValue>(yaml)? {
            JsonValue::Null => Ok(Self::new()),
            value => Ok(Self(value)),
        }
    }

    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Set the value at a dotted path, creating maps along the way
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let mut slot = &mut self.0;
        for key in path.split('.') {
            if !slot.is_object() {
                *slot = JsonValue::Object(Map::new());
            }
            slot = match slot {
                JsonValue::Object(map) => map.entry(key).or_insert(JsonValue::Null),
                _ => unreachable!("slot was just made a map"),
            };
        }
        *slot = value;
    }

    /// Value at a dotted path such as `image.tag`
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.0, |current, key| current.as_object()?.get(key))
    }

    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_null() || self.0.as_object().is_some_and(Map::is_empty)
    }

    /// Values a sub-chart named `name` starts from: its own defaults, then
    /// the parent's `<name>` section and `global` section on top
    pub fn for_subchart(defaults: Values, parent: &Values, name: &str) -> Values {
        let mut values = defaults;
        if let Some(global) = parent.get(GLOBAL_KEY) {
            deep_merge(&mut values.0, &serde_json::json!({ GLOBAL_KEY: global }));
        }
        if let Some(section @ JsonValue::Object(_)) = parent.0.get(name) {
            deep_merge(&mut values.0, section);
        }
        values
    }
}

/// Merge `overlay` into `base`; maps merge recursively, everything else
/// replaces
pub fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    if let (JsonValue::Object(target), JsonValue::Object(source)) = (&mut *base, overlay) {
        for (key, value) in source {
            match target.get_mut(key) {
                Some(existing) => deep_merge(existing, value),
                None => {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        return;
    }
    *base = overlay.clone();
}

/// Values from `key=value` pairs as given to `--set`
pub fn parse_set_values(pairs: &[String]) -> Result<Values> {
    let mut values = Values::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| CoreError::ValuesMerge {
                message: format!("Invalid --set format: '{}'. Expected key=value", pair),
            })?;
        values.set(key, parse_scalar(raw));
    }
    Ok(values)
}

/// Booleans, null, numbers and inline JSON collections keep their type;
/// anything else is a string
fn parse_scalar(raw: &str) -> JsonValue {
    match raw {
        "true" => return JsonValue::Bool(true),
        "false" => return JsonValue::Bool(false),
        "null" => return JsonValue::Null,
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return int.into();
    }
    if let Some(float) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return JsonValue::Number(float);
    }
    if raw.starts_with(['[', '{'])
        && let Ok(parsed) = serde_json::from_str(raw)
    {
        return parsed;
    }
    JsonValue::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_maps_and_replace_the_rest() {
        let mut base = Values::from_yaml(
            "image:\n  repository: uaa\n  tag: \"1.0\"\nports: [8080, 8443]\nreplicas: 1\n",
        )
        .unwrap();
        let overlay =
            Values::from_yaml("image:\n  tag: \"2.0\"\nports: [9090]\nreplicas: 3\n").unwrap();

        base.merge(&overlay);

        assert_eq!(base.get("image.repository").unwrap().as_str(), Some("uaa"));
        assert_eq!(base.get("image.tag").unwrap().as_str(), Some("2.0"));
        assert_eq!(base.get("ports"), Some(&json!([9090])));
        assert_eq!(base.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_empty_documents() {
        assert!(Values::from_yaml("").unwrap().is_empty());
        assert!(Values::from_yaml("# nothing here\n").unwrap().is_empty());
        assert!(
            Values::from_file_or_default("/nonexistent/values.yaml")
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_parse_set_values() {
        let pairs = [
            "image.tag=v2",
            "replicas=5",
            "debug=true",
            "ratio=0.5",
            "zones=[\"a\",\"b\"]",
            "note=[not json",
        ]
        .map(String::from);

        let values = parse_set_values(&pairs).unwrap();

        assert_eq!(values.get("image.tag").unwrap().as_str(), Some("v2"));
        assert_eq!(values.get("replicas").unwrap(), 5);
        assert_eq!(values.get("debug").unwrap(), true);
        assert_eq!(values.get("ratio").unwrap(), 0.5);
        assert_eq!(values.get("zones"), Some(&json!(["a", "b"])));
        assert_eq!(values.get("note").unwrap().as_str(), Some("[not json"));
        assert!(parse_set_values(&["novalue".to_string()]).is_err());
        assert!(parse_set_values(&["=1".to_string()]).is_err());
    }

    #[test]
    fn test_set_replaces_scalars_on_the_path() {
        let mut values = Values::from_yaml("image: uaa\n").unwrap();
        values.set("image.tag", json!("v1"));
        assert_eq!(values.get("image.tag").unwrap().as_str(), Some("v1"));
    }

    #[test]
    fn test_for_subchart() {
        let defaults = Values::from_yaml("enabled: false\nreplicas: 1\nimage:\n  repository: redis\n").unwrap();
        let parent = Values::from_yaml(
            "global:\n  pullPolicy: Always\nredis:\n  enabled: true\n  replicas: 3\npostgresql:\n  enabled: false\n",
        )
        .unwrap();

        let result = Values::for_subchart(defaults, &parent, "redis");

        assert_eq!(result.get("global.pullPolicy").unwrap().as_str(), Some("Always"));
        assert_eq!(result.get("enabled").unwrap(), true);
        assert_eq!(result.get("replicas").unwrap(), 3);
        assert_eq!(result.get("image.repository").unwrap().as_str(), Some("redis"));
        assert!(result.get("postgresql").is_none());
    }
}
