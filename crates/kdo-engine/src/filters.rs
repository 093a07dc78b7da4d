//! Template filters
//!
//! Helm-compatible helpers for manifests written as minijinja templates.

use base64::Engine as _;
use minijinja::{Error, ErrorKind, Value};

fn invalid(message: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.to_string())
}

fn to_json(value: &Value) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(invalid)
}

/// Usage: {{ values.resources | toyaml | nindent(4) }}
pub fn toyaml(value: Value) -> Result<String, Error> {
    let yaml = serde_yaml::to_string(&to_json(&value)?).map_err(invalid)?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// Usage: {{ values.config | tojson }}
pub fn tojson(value: Value) -> Result<String, Error> {
    serde_json::to_string(&to_json(&value)?).map_err(invalid)
}

pub fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

pub fn b64decode(value: String) -> Result<String, Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.as_bytes())
        .map_err(|e| invalid(format!("base64 decode error: {}", e)))?;
    String::from_utf8(decoded).map_err(|e| invalid(format!("UTF-8 decode error: {}", e)))
}

/// Usage: {{ release.name | quote }}
pub fn quote(value: Value) -> String {
    let s = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Indent every non-empty line, starting on a new line
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

pub fn indent(value: String, spaces: usize) -> String {
    let prefix = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", prefix, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Usage: {{ values.host | required("host is required") }}
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined()
        || value.is_none()
        || value.as_str().is_some_and(str::is_empty);
    if missing {
        Err(invalid(
            message.unwrap_or_else(|| "required value is missing".to_string()),
        ))
    } else {
        Ok(value)
    }
}

pub fn sha256sum(value: String) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Truncate to at most `length` characters
pub fn trunc(value: String, length: usize) -> String {
    value.chars().take(length).collect()
}

pub fn trimprefix(value: String, prefix: String) -> String {
    value.strip_prefix(&prefix).unwrap_or(&value).to_string()
}

pub fn trimsuffix(value: String, suffix: String) -> String {
    value.strip_suffix(&suffix).unwrap_or(&value).to_string()
}

/// Usage: {{ values.base | merge(values.extra) }}
pub fn merge(base: Value, overlay: Value) -> Result<Value, Error> {
    let mut merged = to_json(&base)?;
    kdo_core::values::deep_merge(&mut merged, &to_json(&overlay)?);
    Ok(Value::from_serialize(&merged))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toyaml_nested() {
        let value = Value::from_serialize(serde_json::json!({"a": {"b": 1}}));
        assert_eq!(toyaml(value).unwrap(), "a:\n  b: 1");
    }

    #[test]
    fn test_nindent_skips_empty_lines() {
        assert_eq!(nindent("a: 1\n\nb: 2".to_string(), 2), "\n  a: 1\n\n  b: 2");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(Value::from("say \"hi\"")), "\"say \\\"hi\\\"\"");
        assert_eq!(quote(Value::from(3)), "\"3\"");
    }

    #[test]
    fn test_required() {
        assert!(required(Value::UNDEFINED, None).is_err());
        assert!(required(Value::from(""), Some("need host".into())).is_err());
        assert_eq!(required(Value::from("db"), None).unwrap(), Value::from("db"));
    }

    #[test]
    fn test_b64_roundtrip() {
        assert_eq!(b64decode(b64encode("kdo".into())).unwrap(), "kdo");
    }

    #[test]
    fn test_merge() {
        let base = Value::from_serialize(serde_json::json!({"a": {"x": 1, "y": 2}}));
        let overlay = Value::from_serialize(serde_json::json!({"a": {"y": 3}}));
        let merged = to_json(&merge(base, overlay).unwrap()).unwrap();
        assert_eq!(merged, serde_json::json!({"a": {"x": 1, "y": 3}}));
    }
}
