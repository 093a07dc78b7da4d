//! Cluster transport backed by the Kubernetes API
//!
//! Objects are handled as `DynamicObject`s: the API resource of a kind is
//! looked up in the discovery cache taken when the handle was created, so
//! custom resources work without compile-time types.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use kdo_core::cluster::readiness::{self, Rollout};
use kdo_core::{
    Cluster, ClusterScope, CoreError, Object, ObjectConsumer, ObjectSource, ObjectStream, Options,
    PatchType, Tool,
};
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::core::{GroupVersionKind, TypeMeta};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Client, Config};
use semver::Version;
use serde_json::Value as JsonValue;
use tokio::time::Instant;

use crate::error::{KubeError, Result};
use crate::rollout;

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "kdo";

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A cluster handle talking to a live API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    discovery: Arc<Discovery>,
    host: String,
    scope: ClusterScope,
    poll_interval: Duration,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster")
            .field("host", &self.host)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl KubeCluster {
    /// Connect using the inferred configuration (kubeconfig or in-cluster).
    ///
    /// `namespace` overrides the kubeconfig context namespace.
    pub async fn connect(namespace: Option<&str>) -> Result<Self> {
        let config = Config::infer()
            .await
            .map_err(|e| KubeError::Config(e.to_string()))?;
        let namespace = namespace
            .map(str::to_string)
            .unwrap_or_else(|| config.default_namespace.clone());
        let host = config.cluster_url.to_string();
        let client = Client::try_from(config)?;
        Self::with_client(client, host, &namespace).await
    }

    /// Wrap an existing client, running API discovery once
    pub async fn with_client(client: Client, host: String, namespace: &str) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        tracing::debug!(%host, namespace, groups = discovery.groups().count(), "connected to cluster");
        Ok(Self {
            client,
            discovery: Arc::new(discovery),
            host,
            scope: ClusterScope::new(namespace),
            poll_interval: POLL_INTERVAL,
        })
    }

    fn derive(&self, scope: ClusterScope) -> Arc<dyn Cluster> {
        Arc::new(Self {
            client: self.client.clone(),
            discovery: self.discovery.clone(),
            host: self.host.clone(),
            scope,
            poll_interval: self.poll_interval,
        })
    }

    /// API resource for a kind, by exact group/version when known, else by
    /// kind or plural name across all discovered groups
    fn resolve(&self, api_version: Option<&str>, kind: &str) -> Result<(ApiResource, ApiCapabilities)> {
        if let Some(api_version) = api_version.filter(|v| !v.is_empty()) {
            let gvk = gvk_from_type_meta(&TypeMeta {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            });
            if let Some(found) = self.discovery.resolve_gvk(&gvk) {
                return Ok(found);
            }
        }

        self.discovery
            .groups()
            .flat_map(|group| group.recommended_resources())
            .find(|(resource, _)| {
                resource.kind.eq_ignore_ascii_case(kind) || resource.plural.eq_ignore_ascii_case(kind)
            })
            .ok_or_else(|| KubeError::UnknownResource {
                kind: kind.to_string(),
                api_version: api_version.map(str::to_string),
            })
    }

    /// Namespace a call targets. `None` for cluster-scoped kinds and for
    /// calls across all namespaces.
    fn namespace_for(&self, capabilities: &ApiCapabilities, options: &Options) -> Option<String> {
        if capabilities.scope != Scope::Namespaced {
            return None;
        }
        options
            .effective_namespace(&self.scope.namespace)
            .map(str::to_string)
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    fn api_for(&self, kind: &str, options: &Options) -> Result<(Api<DynamicObject>, ApiResource)> {
        let (resource, capabilities) = self.resolve(None, kind)?;
        let namespace = self.namespace_for(&capabilities, options);
        Ok((self.api(&resource, namespace.as_deref()), resource))
    }

    async fn apply_one(&self, object: Object, options: &Options) -> kdo_core::Result<()> {
        let id = object.id();
        let (resource, capabilities) = self
            .resolve(Some(object.api_version()), object.kind())
            .map_err(|e| e.into_apply(&id))?;

        let namespace = apply_namespace(
            &object,
            capabilities.scope == Scope::Namespaced,
            options,
            &self.scope.namespace,
        );

        let mut dynamic: DynamicObject = serde_json::from_value(object.into_value())
            .map_err(|e| KubeError::from(e).into_apply(&id))?;
        dynamic.metadata.namespace = namespace.clone();
        let name = dynamic
            .metadata
            .name
            .clone()
            .ok_or_else(|| KubeError::InvalidManifest("missing metadata.name".to_string()).into_apply(&id))?;

        let api = self.api(&resource, namespace.as_deref());
        match self.scope.tool {
            Tool::ServerSide => {
                let params = PatchParams::apply(FIELD_MANAGER).force();
                api.patch(&name, &params, &Patch::Apply(&dynamic))
                    .await
                    .map_err(|e| KubeError::from(e).into_apply(&id))?;
            }
            Tool::Replace => {
                let existing = api
                    .get_opt(&name)
                    .await
                    .map_err(|e| KubeError::from(e).into_apply(&id))?;
                let params = PostParams::default();
                let written = match existing {
                    Some(existing) => {
                        dynamic.metadata.resource_version = existing.metadata.resource_version;
                        api.replace(&name, &params, &dynamic).await
                    }
                    None => api.create(&params, &dynamic).await,
                };
                written.map_err(|e| KubeError::from(e).into_apply(&id))?;
            }
        }
        tracing::debug!(object = %id, tool = %self.scope.tool, "applied");
        Ok(())
    }

    async fn poll(
        &self,
        kind: &str,
        name: &str,
        options: &Options,
        check: impl FnMut(&Object) -> Rollout + Send,
    ) -> kdo_core::Result<()> {
        rollout::poll(self, kind, name, options, self.poll_interval, check).await
    }
}

/// Convert a TypeMeta to a GroupVersionKind
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };
    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}

/// List and watch responses omit the type of each item
fn to_object(mut dynamic: DynamicObject, resource: &ApiResource) -> kdo_core::Result<Object> {
    if dynamic.types.is_none() {
        dynamic.types = Some(TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
    }
    Object::from_value(serde_json::to_value(dynamic)?)
}

struct ApplyConsumer<'a> {
    cluster: &'a KubeCluster,
    options: &'a Options,
}

#[async_trait]
impl ObjectConsumer for ApplyConsumer<'_> {
    async fn accept(&mut self, object: Object) -> kdo_core::Result<()> {
        self.cluster.apply_one(object, self.options).await
    }
}

struct KubeWatch {
    api: Api<DynamicObject>,
    resource: ApiResource,
    name: String,
    timeout: Option<Duration>,
}

#[async_trait]
impl ObjectSource for KubeWatch {
    async fn drain(self: Box<Self>, consumer: &mut dyn ObjectConsumer) -> kdo_core::Result<()> {
        let KubeWatch {
            api,
            resource,
            name,
            timeout,
        } = *self;
        let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
        let mut events = Box::pin(watcher(api, config).applied_objects());
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, events.try_next()).await {
                    Ok(next) => next,
                    Err(_) => return Ok(()),
                },
                None => events.try_next().await,
            };
            let next = next.map_err(|e| CoreError::Cluster {
                message: format!("watch of {} failed: {}", name, e),
            })?;
            match next {
                Some(dynamic) => consumer.accept(to_object(dynamic, &resource)?).await?,
                None => return Ok(()),
            }
        }
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    fn host(&self) -> &str {
        &self.host
    }

    fn scope(&self) -> &ClusterScope {
        &self.scope
    }

    fn with_tool(&self, tool: Tool) -> Arc<dyn Cluster> {
        self.derive(self.scope.with_tool(tool))
    }

    fn for_sub_chart(
        &self,
        namespace: &str,
        release: &str,
        version: &Version,
        subcharts: usize,
    ) -> Arc<dyn Cluster> {
        tracing::debug!(namespace, release, %version, subcharts, "scoping cluster handle");
        self.derive(self.scope.for_sub_chart(namespace, release, version, subcharts))
    }

    async fn apply(&self, stream: ObjectStream, options: &Options) -> kdo_core::Result<()> {
        let mut consumer = ApplyConsumer {
            cluster: self,
            options,
        };
        stream.drain(&mut consumer).await
    }

    async fn get(&self, kind: &str, name: &str, options: &Options) -> kdo_core::Result<Option<Object>> {
        let (api, resource) = self.api_for(kind, options)?;
        match api.get_opt(name).await.map_err(KubeError::from)? {
            Some(dynamic) => Ok(Some(to_object(dynamic, &resource)?)),
            None if options.ignore_not_found => Ok(None),
            None => Err(CoreError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            }),
        }
    }

    async fn list(
        &self,
        kind: &str,
        selector: Option<&str>,
        options: &Options,
    ) -> kdo_core::Result<Vec<Object>> {
        let (api, resource) = self.api_for(kind, options)?;
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }
        api.list(&params)
            .await
            .map_err(KubeError::from)?
            .items
            .into_iter()
            .map(|dynamic| to_object(dynamic, &resource))
            .collect()
    }

    async fn patch(
        &self,
        kind: &str,
        name: &str,
        patch: &JsonValue,
        patch_type: PatchType,
        options: &Options,
    ) -> kdo_core::Result<Option<Object>> {
        let (api, resource) = self.api_for(kind, options)?;
        let patch = match patch_type {
            PatchType::Merge => Patch::Merge(patch),
            PatchType::Strategic => Patch::Strategic(patch),
        };
        match api.patch(name, &PatchParams::default(), &patch).await {
            Ok(dynamic) => Ok(Some(to_object(dynamic, &resource)?)),
            Err(e) => {
                let e = KubeError::from(e);
                if e.is_not_found() && options.ignore_not_found {
                    Ok(None)
                } else if e.is_not_found() {
                    Err(CoreError::NotFound {
                        kind: kind.to_string(),
                        name: name.to_string(),
                    })
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn delete(&self, kind: &str, name: &str, options: &Options) -> kdo_core::Result<()> {
        let (api, _) = self.api_for(kind, options)?;
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let e = KubeError::from(e);
                if e.is_not_found() && options.ignore_not_found {
                    Ok(())
                } else if e.is_not_found() {
                    Err(CoreError::NotFound {
                        kind: kind.to_string(),
                        name: name.to_string(),
                    })
                } else {
                    Err(e.into())
                }
            }
        }
    }

    fn watch(&self, kind: &str, name: &str, options: &Options) -> ObjectStream {
        match self.api_for(kind, options) {
            Ok((api, resource)) => ObjectStream::from_source(KubeWatch {
                api,
                resource,
                name: name.to_string(),
                timeout: options.deadline(),
            }),
            Err(e) => ObjectStream::error(e.into()),
        }
    }

    async fn rollout_status(&self, kind: &str, name: &str, options: &Options) -> kdo_core::Result<()> {
        self.poll(kind, name, options, readiness::evaluate).await
    }

    async fn wait(
        &self,
        kind: &str,
        name: &str,
        condition: &str,
        options: &Options,
    ) -> kdo_core::Result<()> {
        self.poll(kind, name, options, |object| {
            if readiness::has_condition(object, condition) {
                Rollout::Complete
            } else {
                Rollout::Progressing(format!("waiting for condition {}", condition))
            }
        })
        .await
    }
}

/// Namespace an object is applied to. The object's own namespace wins;
/// cluster-scoped calls add none.
fn apply_namespace(
    object: &Object,
    namespaced_kind: bool,
    options: &Options,
    scoped: &str,
) -> Option<String> {
    if !namespaced_kind {
        return None;
    }
    object
        .namespace()
        .or_else(|| options.effective_namespace(scoped))
        .map(str::to_string)
}
