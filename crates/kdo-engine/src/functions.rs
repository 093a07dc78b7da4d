//! Global functions available in templates

use minijinja::{Error, ErrorKind, Value};

/// Usage: {{ fail("region must be set") }}
pub fn fail(message: String) -> Result<Value, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, message))
}

/// Usage: {{ dict("name", release.name, "port", 80) }}
pub fn dict(args: Vec<Value>) -> Result<Value, Error> {
    if args.len() % 2 != 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "dict requires an even number of arguments (key-value pairs)",
        ));
    }

    let mut map = indexmap::IndexMap::new();
    for pair in args.chunks(2) {
        let key = pair[0]
            .as_str()
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "dict keys must be strings"))?;
        map.insert(key.to_string(), pair[1].clone());
    }
    Ok(Value::from_iter(map))
}

pub fn list(args: Vec<Value>) -> Value {
    Value::from(args)
}

/// Usage: {{ get(values, "key", "default") }}
pub fn get(obj: Value, key: String, default: Option<Value>) -> Value {
    match obj.get_attr(&key) {
        Ok(v) if !v.is_undefined() => v,
        _ => default.unwrap_or(Value::UNDEFINED),
    }
}

/// First argument that is neither undefined, none nor an empty string
pub fn coalesce(args: Vec<Value>) -> Value {
    args.into_iter()
        .find(|arg| {
            !arg.is_undefined() && !arg.is_none() && !arg.as_str().is_some_and(str::is_empty)
        })
        .unwrap_or(Value::UNDEFINED)
}

/// Usage: {{ ternary("yes", "no", values.enabled) }}
pub fn ternary(true_val: Value, false_val: Value, condition: Value) -> Value {
    if condition.is_true() {
        true_val
    } else {
        false_val
    }
}

pub fn tostring(value: Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

pub fn toint(value: Value) -> Result<i64, Error> {
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    value
        .as_str()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("cannot convert {} to int", value),
            )
        })
}

/// Printf-style formatting with `%s`, `%d`, `%v` and `%%`
pub fn printf(format: String, args: Vec<Value>) -> Result<String, Error> {
    let mut result = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => result.push('%'),
            Some(_) => {
                let arg = args.next().ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidOperation,
                        "not enough arguments for format string",
                    )
                })?;
                result.push_str(&tostring(arg.clone()));
            }
            None => result.push('%'),
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_requires_pairs() {
        assert!(dict(vec![Value::from("a")]).is_err());
        let d = dict(vec![Value::from("a"), Value::from(1)]).unwrap();
        assert_eq!(d.get_attr("a").unwrap(), Value::from(1));
    }

    #[test]
    fn test_coalesce() {
        let v = coalesce(vec![Value::UNDEFINED, Value::from(""), Value::from("x")]);
        assert_eq!(v, Value::from("x"));
    }

    #[test]
    fn test_printf() {
        let s = printf("%s-%d%%".to_string(), vec![Value::from("db"), Value::from(2)]).unwrap();
        assert_eq!(s, "db-2%");
        assert!(printf("%s".to_string(), vec![]).is_err());
    }

    #[test]
    fn test_toint() {
        assert_eq!(toint(Value::from("42")).unwrap(), 42);
        assert!(toint(Value::from("x")).is_err());
    }
}
