//! Jewel resolution
//!
//! Each jewel resolves at most once per pass. The persisted Secret wins over
//! anything a backend would produce; backends only fill missing keys.

use std::sync::Arc;

use kdo_core::{Chart, Cluster, CoreError, Jewel, JewelStore, JewelValue, ObjectStream, Result};

use crate::backends::ClusterJewelStore;

#[derive(Clone)]
pub struct Vault {
    store: Arc<dyn JewelStore>,
}

impl Default for Vault {
    fn default() -> Self {
        Self::new(Arc::new(ClusterJewelStore))
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

impl Vault {
    pub fn new(store: Arc<dyn JewelStore>) -> Self {
        Self { store }
    }

    /// Resolved value of `jewel`, provisioning missing keys on first use
    pub async fn resolve<'a>(&self, jewel: &'a Jewel, cluster: &dyn Cluster) -> Result<&'a JewelValue> {
        jewel
            .get_or_resolve(|| async {
                let secret_name = jewel.secret_name();
                let persisted = self
                    .store
                    .load(cluster, &secret_name)
                    .await?
                    .unwrap_or_default();

                let backend = jewel.backend();
                let complete = backend.keys().keys().all(|k| persisted.contains_key(k));
                if complete {
                    tracing::debug!(jewel = jewel.name(), secret = %secret_name, "jewel already persisted");
                    return Ok(persisted);
                }

                tracing::info!(jewel = jewel.name(), backend = backend.name(), "provisioning jewel");
                let produced = backend.apply(&persisted).await.map_err(|err| match err {
                    err @ CoreError::SecretBackend { .. } => err,
                    other => CoreError::SecretBackend {
                        jewel: jewel.name().to_string(),
                        message: other.to_string(),
                    },
                })?;

                let mut value = produced;
                value.extend(persisted);
                Ok::<_, CoreError>(value)
            })
            .await
    }

    /// Secrets persisting every jewel of `chart`, resolved when drained
    pub fn stream(&self, chart: &Chart, cluster: Arc<dyn Cluster>) -> ObjectStream {
        if chart.jewels.is_empty() {
            return ObjectStream::empty();
        }
        let vault = self.clone();
        let jewels = chart.jewels.clone();
        ObjectStream::deferred(move || async move {
            let mut secrets = Vec::with_capacity(jewels.len());
            for jewel in &jewels {
                let value = vault.resolve(jewel, cluster.as_ref()).await?;
                secrets.push(jewel.to_secret(value));
            }
            Ok::<_, CoreError>(ObjectStream::from_objects(secrets))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use kdo_core::jewel::secret_data;
    use kdo_core::{InMemoryCluster, JewelBackend, JewelKey, Options};

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JewelBackend for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn keys(&self) -> BTreeMap<String, JewelKey> {
            ["username", "password"]
                .into_iter()
                .map(|k| (k.to_string(), JewelKey::default()))
                .collect()
        }

        async fn apply(&self, _existing: &JewelValue) -> Result<JewelValue> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(JewelValue::from([
                ("username".to_string(), "generated".to_string()),
                ("password".to_string(), "generated".to_string()),
            ]))
        }
    }

    struct Broken;

    #[async_trait]
    impl JewelBackend for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn keys(&self) -> BTreeMap<String, JewelKey> {
            BTreeMap::from([("value".to_string(), JewelKey::default())])
        }

        async fn apply(&self, _existing: &JewelValue) -> Result<JewelValue> {
            Err(CoreError::Cluster {
                message: "vault sealed".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_persisted_keys_win() {
        let cluster = InMemoryCluster::new("shop");
        let backend = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let jewel = Jewel::new("shop", "db", backend.clone());
        let existing = jewel
            .to_secret(&JewelValue::from([("username".to_string(), "admin".to_string())]))
            .with_namespace("shop");
        cluster.insert(existing);

        let value = Vault::default().resolve(&jewel, &cluster).await.unwrap();
        assert_eq!(value["username"], "admin");
        assert_eq!(value["password"], "generated");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_complete_secret_skips_backend() {
        let cluster = InMemoryCluster::new("shop");
        let backend = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let jewel = Jewel::new("shop", "db", backend.clone());
        cluster.insert(
            jewel
                .to_secret(&JewelValue::from([
                    ("username".to_string(), "a".to_string()),
                    ("password".to_string(), "b".to_string()),
                ]))
                .with_namespace("shop"),
        );

        let value = Vault::default().resolve(&jewel, &cluster).await.unwrap();
        assert_eq!(value["password"], "b");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_attributed() {
        let cluster = InMemoryCluster::new("shop");
        let jewel = Jewel::new("shop", "token", Arc::new(Broken));
        let err = Vault::default().resolve(&jewel, &cluster).await.unwrap_err();
        match err {
            CoreError::SecretBackend { jewel, message } => {
                assert_eq!(jewel, "token");
                assert!(message.contains("vault sealed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_stream_is_idempotent() {
        let cluster = Arc::new(InMemoryCluster::new("shop"));
        let backend = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let manifest = kdo_core::ChartManifest::from_yaml("name: shop\nversion: 1.0.0\n").unwrap();
        let chart = Chart {
            manifest,
            root: std::path::PathBuf::from("."),
            namespace: "shop".to_string(),
            values: kdo_core::Values::new(),
            subcharts: Vec::new(),
            methods: Default::default(),
            jewels: vec![Jewel::new("shop", "db", backend.clone())],
        };

        let vault = Vault::default();
        let first = vault.stream(&chart, cluster.clone()).collect().await.unwrap();
        cluster
            .apply(ObjectStream::from_objects(first.clone()), &Options::new())
            .await
            .unwrap();
        let second = vault.stream(&chart, cluster.clone()).collect().await.unwrap();

        assert_eq!(secret_data(&first[0]).unwrap(), secret_data(&second[0]).unwrap());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
