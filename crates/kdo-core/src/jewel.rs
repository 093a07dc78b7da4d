//! Jewels: named secrets provisioned by pluggable backends
//!
//! A jewel is resolved at most once per apply pass. Its value comes from the
//! Secret persisted by a previous pass when one exists; the backend is only
//! asked for the keys that are still missing.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::OnceCell;

use crate::annotations;
use crate::cluster::Cluster;
use crate::error::{CoreError, Result};
use crate::object::Object;

/// Resolved key/value content of a jewel
pub type JewelValue = BTreeMap<String, String>;

/// Metadata of one key a backend provides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JewelKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Produces jewel values
#[async_trait]
pub trait JewelBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Keys this backend fills
    fn keys(&self) -> BTreeMap<String, JewelKey>;

    /// Compute values given what is already persisted. Keys present in
    /// `existing` are kept by the caller whatever the backend returns.
    async fn apply(&self, existing: &JewelValue) -> Result<JewelValue>;
}

/// Where jewel values persist between passes
#[async_trait]
pub trait JewelStore: Send + Sync {
    /// Persisted value of the Secret `secret_name`, if any
    async fn load(&self, cluster: &dyn Cluster, secret_name: &str) -> Result<Option<JewelValue>>;
}

/// A named secret of a chart
#[derive(Clone)]
pub struct Jewel {
    chart: String,
    name: String,
    backend: Arc<dyn JewelBackend>,
    value: Arc<OnceCell<JewelValue>>,
}

impl Jewel {
    pub fn new(chart: &str, name: &str, backend: Arc<dyn JewelBackend>) -> Self {
        Self {
            chart: chart.to_string(),
            name: name.to_string(),
            backend,
            value: Arc::new(OnceCell::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn JewelBackend> {
        &self.backend
    }

    /// Name of the Secret persisting this jewel
    pub fn secret_name(&self) -> String {
        dns_safe(&format!("{}-{}", self.chart, self.name))
    }

    /// The resolved value, once resolution happened
    pub fn value(&self) -> Option<&JewelValue> {
        self.value.get()
    }

    /// Resolve with `resolve` unless already resolved. Concurrent callers
    /// wait for the first resolution instead of running their own.
    pub async fn get_or_resolve<F, Fut>(&self, resolve: F) -> Result<&JewelValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<JewelValue>>,
    {
        self.value.get_or_try_init(resolve).await
    }

    /// The Secret object persisting `value`
    pub fn to_secret(&self, value: &JewelValue) -> Object {
        let data: serde_json::Map<String, JsonValue> = value
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::String(BASE64.encode(v))))
            .collect();

        Object::new("v1", "Secret", &self.secret_name())
            .with_field("type", JsonValue::String("Opaque".to_string()))
            .with_field("data", JsonValue::Object(data))
            .with_label(annotations::MANAGED_BY_LABEL, annotations::MANAGED_BY)
            .with_annotation(annotations::JEWEL, &self.name)
    }
}

impl fmt::Debug for Jewel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jewel")
            .field("chart", &self.chart)
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("resolved", &self.value.initialized())
            .finish()
    }
}

/// Decode the `data` (base64) and `stringData` of a Secret
pub fn secret_data(secret: &Object) -> Result<JewelValue> {
    let mut value = JewelValue::new();
    if let Some(data) = secret.get("data").and_then(JsonValue::as_object) {
        for (key, encoded) in data {
            let encoded = encoded.as_str().unwrap_or_default();
            let bytes = BASE64.decode(encoded).map_err(|e| CoreError::InvalidObject {
                message: format!("{}: key '{}' is not base64: {}", secret.id(), key, e),
            })?;
            value.insert(key.clone(), String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    if let Some(data) = secret.get("stringData").and_then(JsonValue::as_object) {
        for (key, plain) in data {
            if let Some(plain) = plain.as_str() {
                value.insert(key.clone(), plain.to_string());
            }
        }
    }
    Ok(value)
}

static NOT_DNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9.-]+").expect("valid regex"));

/// Lower-case DNS subdomain form of `name`
pub fn dns_safe(name: &str) -> String {
    let lowered = name.to_ascii_lowercase();
    let replaced = NOT_DNS.replace_all(&lowered, "-");
    replaced.trim_matches(|c| c == '-' || c == '.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed;

    #[async_trait]
    impl JewelBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn keys(&self) -> BTreeMap<String, JewelKey> {
            BTreeMap::from([("password".to_string(), JewelKey::default())])
        }

        async fn apply(&self, _existing: &JewelValue) -> Result<JewelValue> {
            Ok(JewelValue::from([("password".to_string(), "s3cret".to_string())]))
        }
    }

    #[test]
    fn test_dns_safe() {
        assert_eq!(dns_safe("My_Chart-DB Password"), "my-chart-db-password");
        assert_eq!(dns_safe("-a.b-"), "a.b");
    }

    #[test]
    fn test_secret_roundtrip() {
        let jewel = Jewel::new("shop", "db", Arc::new(Fixed));
        let value = JewelValue::from([("password".to_string(), "s3cret".to_string())]);
        let secret = jewel.to_secret(&value);

        assert_eq!(secret.kind(), "Secret");
        assert_eq!(secret.name(), "shop-db");
        assert_eq!(secret.annotation(annotations::JEWEL), Some("db"));
        assert_eq!(secret_data(&secret).unwrap(), value);
    }

    #[tokio::test]
    async fn test_resolves_once() {
        let jewel = Jewel::new("shop", "db", Arc::new(Fixed));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = jewel
                .get_or_resolve(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Fixed.apply(&JewelValue::new()).await
                })
                .await
                .unwrap();
            assert_eq!(value["password"], "s3cret");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(jewel.clone().value().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_resolution() {
        let jewel = Jewel::new("shop", "db", Arc::new(Fixed));
        let copy = jewel.clone();
        let calls = AtomicUsize::new(0);
        let resolve = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Fixed.apply(&JewelValue::new()).await
        };

        let (first, second) = tokio::join!(jewel.get_or_resolve(resolve), copy.get_or_resolve(resolve));

        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
