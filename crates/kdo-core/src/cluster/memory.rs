//! In-memory cluster for tests and offline rendering
//!
//! Objects are kept in a shared store; every handle derived through
//! `for_sub_chart` or `with_tool` sees the same store but carries its own
//! scope.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use semver::Version;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::readiness::{self, Rollout};
use super::{Cluster, ClusterScope, Tool, is_cluster_scoped, parse_selector};
use crate::error::{CoreError, Result};
use crate::object::Object;
use crate::options::{Options, PatchType};
use crate::stream::{ObjectConsumer, ObjectSource, ObjectStream};
use crate::values::deep_merge;

type Key = (String, Option<String>, String);

/// Counts of operations performed, for assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub applies: usize,
    pub gets: usize,
    pub lists: usize,
    pub patches: usize,
    pub deletes: usize,
    pub watches: usize,
    pub rollouts: usize,
}

/// Makes `apply` fail for matching objects
#[derive(Debug, Clone)]
pub struct FailureRule {
    pub name: String,
    pub namespace: Option<String>,
    pub message: String,
}

impl FailureRule {
    pub fn on(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: None,
            message: "injected failure".to_string(),
        }
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    fn matches(&self, object: &Object) -> bool {
        self.name == object.name()
            && self
                .namespace
                .as_deref()
                .is_none_or(|ns| object.namespace() == Some(ns))
    }
}

#[derive(Default)]
struct Store {
    objects: BTreeMap<Key, Object>,
    applied: Vec<Object>,
}

struct Shared {
    host: String,
    store: RwLock<Store>,
    counts: RwLock<OperationCounts>,
    failures: RwLock<Vec<FailureRule>>,
    events: broadcast::Sender<Object>,
    poll_interval: Duration,
}

/// A cluster that lives in memory
#[derive(Clone)]
pub struct InMemoryCluster {
    shared: Arc<Shared>,
    scope: ClusterScope,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn key(kind: &str, namespace: Option<&str>, name: &str) -> Key {
    (
        kind.to_ascii_lowercase(),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

impl InMemoryCluster {
    pub fn new(namespace: &str) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                host: "memory://local".to_string(),
                store: RwLock::new(Store::default()),
                counts: RwLock::new(OperationCounts::default()),
                failures: RwLock::new(Vec::new()),
                events,
                poll_interval: Duration::from_millis(10),
            }),
            scope: ClusterScope::new(namespace),
        }
    }

    /// Register a failure for objects matching `rule`
    pub fn fail_on(&self, rule: FailureRule) {
        write(&self.shared.failures).push(rule);
    }

    /// Store an object directly, as if a controller created it
    pub fn insert(&self, object: Object) {
        let object = self.place(object, &Options::default());
        let k = key(object.kind(), object.namespace(), object.name());
        write(&self.shared.store).objects.insert(k, object.clone());
        let _ = self.shared.events.send(object);
    }

    /// Replace the `status` of a stored object
    pub fn set_status(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        status: JsonValue,
    ) -> Result<()> {
        let updated = {
            let mut store = write(&self.shared.store);
            let object = store
                .objects
                .get_mut(&key(kind, namespace, name))
                .ok_or_else(|| not_found(kind, name))?;
            let mut body = object.body().clone();
            if let JsonValue::Object(map) = &mut body {
                map.insert("status".to_string(), status);
            }
            *object = Object::from_value(body)?;
            object.clone()
        };
        let _ = self.shared.events.send(updated);
        Ok(())
    }

    /// A stored object
    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<Object> {
        read(&self.shared.store)
            .objects
            .get(&key(kind, namespace, name))
            .cloned()
    }

    /// Every stored object, ordered by kind, namespace and name
    pub fn objects(&self) -> Vec<Object> {
        read(&self.shared.store).objects.values().cloned().collect()
    }

    /// Every applied object, in apply order
    pub fn applied(&self) -> Vec<Object> {
        read(&self.shared.store).applied.clone()
    }

    pub fn operation_counts(&self) -> OperationCounts {
        read(&self.shared.counts).clone()
    }

    fn count(&self, f: impl FnOnce(&mut OperationCounts)) {
        f(&mut write(&self.shared.counts));
    }

    fn place(&self, object: Object, options: &Options) -> Object {
        if is_cluster_scoped(object.kind()) || object.namespace().is_some() {
            return object;
        }
        match options.effective_namespace(&self.scope.namespace) {
            Some(ns) => object.with_namespace(ns),
            None => object,
        }
    }

    fn lookup_namespace<'a>(&'a self, kind: &str, options: &'a Options) -> Option<&'a str> {
        if is_cluster_scoped(kind) {
            None
        } else {
            options.effective_namespace(&self.scope.namespace)
        }
    }

    fn apply_one(&self, object: Object, options: &Options) -> Result<()> {
        let object = self.place(object, options);

        if let Some(rule) = read(&self.shared.failures)
            .iter()
            .find(|rule| rule.matches(&object))
        {
            return Err(CoreError::Apply {
                object: object.id(),
                message: rule.message.clone(),
            });
        }

        let stored = {
            let mut store = write(&self.shared.store);
            let k = key(object.kind(), object.namespace(), object.name());
            let stored = match (self.scope.tool, store.objects.get(&k)) {
                (Tool::ServerSide, Some(existing)) => {
                    let mut merged = existing.body().clone();
                    deep_merge(&mut merged, object.body());
                    Object::from_value(merged)?
                }
                _ => object,
            };
            store.objects.insert(k, stored.clone());
            store.applied.push(stored.clone());
            stored
        };
        self.count(|c| c.applies += 1);
        let _ = self.shared.events.send(stored);
        Ok(())
    }

    async fn poll<F>(&self, kind: &str, name: &str, options: &Options, mut check: F) -> Result<()>
    where
        F: FnMut(&Object) -> Rollout + Send,
    {
        let started = Instant::now();
        loop {
            let Some(object) = self.get(kind, name, options).await? else {
                return Ok(());
            };
            match check(&object) {
                Rollout::Complete => return Ok(()),
                Rollout::Failed(message) => {
                    return Err(CoreError::Apply {
                        object: object.id(),
                        message,
                    });
                }
                Rollout::Progressing(_) => {}
            }
            if let Some(limit) = options.deadline() {
                if started.elapsed() >= limit {
                    return Err(CoreError::RolloutTimeout {
                        kind: kind.to_string(),
                        name: name.to_string(),
                        timeout: limit,
                    });
                }
            }
            tokio::time::sleep(self.shared.poll_interval).await;
        }
    }
}

fn not_found(kind: &str, name: &str) -> CoreError {
    CoreError::NotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

/// JSON merge patch: `null` removes a key, maps merge, the rest replaces
fn merge_patch(target: &mut JsonValue, patch: &JsonValue) {
    match (target, patch) {
        (JsonValue::Object(target_map), JsonValue::Object(patch_map)) => {
            for (k, v) in patch_map {
                if v.is_null() {
                    target_map.remove(k);
                } else {
                    merge_patch(
                        target_map.entry(k.clone()).or_insert(JsonValue::Null),
                        v,
                    );
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

struct ApplyConsumer<'a> {
    cluster: &'a InMemoryCluster,
    options: &'a Options,
}

#[async_trait]
impl ObjectConsumer for ApplyConsumer<'_> {
    async fn accept(&mut self, object: Object) -> Result<()> {
        self.cluster.apply_one(object, self.options)
    }
}

struct MemoryWatch {
    initial: Option<Object>,
    events: broadcast::Receiver<Object>,
    target: Key,
    timeout: Option<Duration>,
}

#[async_trait]
impl ObjectSource for MemoryWatch {
    async fn drain(self: Box<Self>, consumer: &mut dyn ObjectConsumer) -> Result<()> {
        let MemoryWatch {
            initial,
            mut events,
            target,
            timeout,
        } = *self;
        let deadline = timeout.map(|t| Instant::now() + t);

        if let Some(object) = initial {
            consumer.accept(object).await?;
        }
        loop {
            let received = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, events.recv()).await {
                    Ok(received) => received,
                    Err(_) => return Ok(()),
                },
                None => events.recv().await,
            };
            match received {
                Ok(object) => {
                    if key(object.kind(), object.namespace(), object.name()) == target {
                        consumer.accept(object).await?;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}

#[async_trait]
impl Cluster for InMemoryCluster {
    fn host(&self) -> &str {
        &self.shared.host
    }

    fn scope(&self) -> &ClusterScope {
        &self.scope
    }

    fn with_tool(&self, tool: Tool) -> Arc<dyn Cluster> {
        Arc::new(Self {
            shared: self.shared.clone(),
            scope: self.scope.with_tool(tool),
        })
    }

    fn for_sub_chart(
        &self,
        namespace: &str,
        release: &str,
        version: &Version,
        subcharts: usize,
    ) -> Arc<dyn Cluster> {
        Arc::new(Self {
            shared: self.shared.clone(),
            scope: self
                .scope
                .for_sub_chart(namespace, release, version, subcharts),
        })
    }

    async fn apply(&self, stream: ObjectStream, options: &Options) -> Result<()> {
        let mut consumer = ApplyConsumer {
            cluster: self,
            options,
        };
        tracing::debug!(namespace = %self.scope.namespace, "applying stream in memory");
        stream.drain(&mut consumer).await
    }

    async fn get(&self, kind: &str, name: &str, options: &Options) -> Result<Option<Object>> {
        self.count(|c| c.gets += 1);
        let found = self.object(kind, self.lookup_namespace(kind, options), name);
        match found {
            Some(object) => Ok(Some(object)),
            None if options.ignore_not_found => Ok(None),
            None => Err(not_found(kind, name)),
        }
    }

    async fn list(
        &self,
        kind: &str,
        selector: Option<&str>,
        options: &Options,
    ) -> Result<Vec<Object>> {
        self.count(|c| c.lists += 1);
        let terms = selector.map(parse_selector).transpose()?.unwrap_or_default();
        let namespace = self.lookup_namespace(kind, options);
        let kind = kind.to_ascii_lowercase();

        Ok(read(&self.shared.store)
            .objects
            .iter()
            .filter(|((k, ns, _), _)| {
                *k == kind && namespace.is_none_or(|wanted| ns.as_deref() == Some(wanted))
            })
            .map(|(_, object)| object)
            .filter(|object| {
                terms
                    .iter()
                    .all(|(k, v)| object.label(k) == Some(v.as_str()))
            })
            .cloned()
            .collect())
    }

    async fn patch(
        &self,
        kind: &str,
        name: &str,
        patch: &JsonValue,
        _patch_type: PatchType,
        options: &Options,
    ) -> Result<Option<Object>> {
        self.count(|c| c.patches += 1);
        let k = key(kind, self.lookup_namespace(kind, options), name);
        let patched = {
            let mut store = write(&self.shared.store);
            let Some(existing) = store.objects.get_mut(&k) else {
                return if options.ignore_not_found {
                    Ok(None)
                } else {
                    Err(not_found(kind, name))
                };
            };
            let mut body = existing.body().clone();
            merge_patch(&mut body, patch);
            *existing = Object::from_value(body)?;
            existing.clone()
        };
        let _ = self.shared.events.send(patched.clone());
        Ok(Some(patched))
    }

    async fn delete(&self, kind: &str, name: &str, options: &Options) -> Result<()> {
        self.count(|c| c.deletes += 1);
        let removed = write(&self.shared.store)
            .objects
            .remove(&key(kind, self.lookup_namespace(kind, options), name));
        match removed {
            Some(_) => Ok(()),
            None if options.ignore_not_found => Ok(()),
            None => Err(not_found(kind, name)),
        }
    }

    fn watch(&self, kind: &str, name: &str, options: &Options) -> ObjectStream {
        self.count(|c| c.watches += 1);
        let events = self.shared.events.subscribe();
        let namespace = self.lookup_namespace(kind, options);
        let initial = self.object(kind, namespace, name);
        ObjectStream::from_source(MemoryWatch {
            initial,
            events,
            target: key(kind, namespace, name),
            timeout: options.deadline(),
        })
    }

    async fn rollout_status(&self, kind: &str, name: &str, options: &Options) -> Result<()> {
        self.count(|c| c.rollouts += 1);
        // Nothing reconciles workloads here: an object without status is done.
        self.poll(kind, name, options, |object| {
            if object.get("status").is_none() {
                Rollout::Complete
            } else {
                readiness::evaluate(object)
            }
        })
        .await
    }

    async fn wait(
        &self,
        kind: &str,
        name: &str,
        condition: &str,
        options: &Options,
    ) -> Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cm(name: &str) -> Object {
        Object::new("v1", "ConfigMap", name)
    }

    #[tokio::test]
    async fn test_apply_places_objects_in_scoped_namespace() {
        let cluster = InMemoryCluster::new("root");
        let sub = cluster.for_sub_chart("db", "db", &Version::new(1, 0, 0), 0);

        sub.apply(
            ObjectStream::from_objects(vec![cm("cfg"), cm("other").with_namespace("explicit")]),
            &Options::default(),
        )
        .await
        .unwrap();

        assert!(cluster.object("ConfigMap", Some("db"), "cfg").is_some());
        assert!(cluster.object("ConfigMap", Some("explicit"), "other").is_some());
        assert!(cluster.object("ConfigMap", Some("root"), "cfg").is_none());
        assert_eq!(cluster.namespace(), "root");
    }

    #[tokio::test]
    async fn test_cluster_scoped_kinds_have_no_namespace() {
        let cluster = InMemoryCluster::new("root");
        cluster
            .apply(
                ObjectStream::from_objects(vec![Object::new("v1", "Namespace", "db")]),
                &Options::default(),
            )
            .await
            .unwrap();
        assert!(cluster.object("Namespace", None, "db").is_some());
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let cluster = InMemoryCluster::new("root");
        let err = cluster
            .get("Secret", "missing", &Options::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let none = cluster
            .get("Secret", "missing", &Options::default().ignoring_not_found())
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_stops_apply() {
        let cluster = InMemoryCluster::new("root");
        cluster.fail_on(FailureRule::on("bad"));

        let err = cluster
            .apply(
                ObjectStream::from_objects(vec![cm("good"), cm("bad"), cm("after")]),
                &Options::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Apply { .. }));
        let applied: Vec<_> = cluster.applied().iter().map(|o| o.name().to_string()).collect();
        assert_eq!(applied, vec!["good"]);
    }

    #[tokio::test]
    async fn test_patch_and_list() {
        let cluster = InMemoryCluster::new("root");
        cluster.insert(cm("a").with_label("app", "x"));
        cluster.insert(cm("b").with_label("app", "y"));

        cluster
            .patch(
                "ConfigMap",
                "b",
                &json!({ "metadata": { "labels": { "app": "x" } }, "data": { "k": "v" } }),
                PatchType::Merge,
                &Options::default(),
            )
            .await
            .unwrap();

        let listed = cluster
            .list("configmap", Some("app=x"), &Options::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);

        cluster
            .delete("ConfigMap", "a", &Options::default())
            .await
            .unwrap();
        assert_eq!(
            cluster.list("ConfigMap", None, &Options::default()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_rollout_status_times_out() {
        let cluster = InMemoryCluster::new("root");
        cluster.insert(Object::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": { "name": "uaa-master" },
            "spec": { "replicas": 1 },
            "status": { "readyReplicas": 0 }
        })).unwrap());

        let err = cluster
            .rollout_status(
                "StatefulSet",
                "uaa-master",
                &Options::default().with_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::RolloutTimeout { .. }));

        cluster
            .set_status(
                "StatefulSet",
                Some("root"),
                "uaa-master",
                json!({ "readyReplicas": 1, "currentReplicas": 1 }),
            )
            .unwrap();
        cluster
            .rollout_status("StatefulSet", "uaa-master", &Options::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_watch_sees_updates() {
        let cluster = InMemoryCluster::new("root");
        cluster.insert(cm("watched"));

        let stream = cluster.watch(
            "ConfigMap",
            "watched",
            &Options::default().with_timeout(Duration::from_millis(200)),
        );
        cluster
            .patch(
                "ConfigMap",
                "watched",
                &json!({ "data": { "v": "2" } }),
                PatchType::Merge,
                &Options::default(),
            )
            .await
            .unwrap();
        cluster.insert(cm("unrelated"));

        let seen = stream.collect().await.unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].get("data.v"), Some(&json!("2")));
    }
}
