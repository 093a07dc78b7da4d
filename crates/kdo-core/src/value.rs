//! Values exchanged with scripted chart logic

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::object::Object;
use crate::stream::ObjectStream;

/// Reference to a member of an extension module, e.g.
/// `{ module: "@extension:myjewel", member: "render" }`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub module: String,
    pub member: String,
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.member)
    }
}

/// A dynamically typed value, as produced by extension modules and methods
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScriptValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ScriptValue>),
    Map(IndexMap<String, ScriptValue>),
    Method(MethodRef),
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "dict",
            Self::Method(_) => "method",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to plain data. Method references have no data form.
    pub fn to_json(&self) -> Result<JsonValue> {
        Ok(match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| CoreError::InvalidObject {
                    message: format!("{} is not representable", f),
                })?,
            Self::String(s) => JsonValue::String(s.clone()),
            Self::List(items) => JsonValue::Array(
                items
                    .iter()
                    .map(ScriptValue::to_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Self::Map(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                JsonValue::Object(out)
            }
            Self::Method(method) => {
                return Err(CoreError::InvalidObject {
                    message: format!("method {} cannot be used as data", method),
                });
            }
        })
    }

    /// Turn a value into objects:
    /// - none: no objects
    /// - dict: one object
    /// - list: each element, in order
    /// - string: multi-document YAML
    /// - stream-less scalars: error
    pub fn into_stream(self) -> ObjectStream {
        match self {
            Self::Null => ObjectStream::empty(),
            Self::String(yaml) => ObjectStream::decode(yaml),
            Self::List(items) => {
                ObjectStream::concat(items.into_iter().map(ScriptValue::into_stream).collect())
            }
            map @ Self::Map(_) => match map.to_json().and_then(Object::from_value) {
                Ok(object) => ObjectStream::from_objects(vec![object]),
                Err(err) => ObjectStream::error(err),
            },
            other => ObjectStream::error(CoreError::InvalidObject {
                message: format!("cannot convert {} to objects", other.type_name()),
            }),
        }
    }
}

impl From<JsonValue> for ScriptValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            JsonValue::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ScriptValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Object> for ScriptValue {
    fn from(object: Object) -> Self {
        Self::from(object.into_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_roundtrip() {
        let json = json!({ "z": 1, "a": [true, null, 1.5], "m": { "k": "v" } });
        let value = ScriptValue::from(json.clone());

        match &value {
            ScriptValue::Map(map) => {
                assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "m", "z"]);
            }
            other => panic!("expected map, got {:?}", other),
        }
        assert_eq!(value.to_json().unwrap(), json);
    }

    #[test]
    fn test_method_is_not_data() {
        let value = ScriptValue::Method(MethodRef {
            module: "@extension:x".to_string(),
            member: "render".to_string(),
        });
        assert!(value.to_json().is_err());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let value = ScriptValue::List(vec![
            ScriptValue::from(json!({ "kind": "ConfigMap", "metadata": { "name": "a" } })),
            ScriptValue::Null,
            ScriptValue::from("kind: Secret\nmetadata:\n  name: b\n---\nkind: Secret\nmetadata:\n  name: c\n"),
        ]);

        let objects = value.into_stream().collect().await.unwrap();
        let names: Vec<_> = objects.iter().map(Object::name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_scalar_into_stream_fails() {
        assert!(ScriptValue::Int(3).into_stream().collect().await.is_err());
    }
}
