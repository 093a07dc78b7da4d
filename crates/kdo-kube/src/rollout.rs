//! Rollout verification
//!
//! After a chart's objects are applied, every workload marked for readiness
//! is polled until its rollout completes. A workload is marked either in
//! `Chart.yaml`:
//!
//! ```yaml
//! readiness:
//!   - kind: StatefulSet
//!     name: uaa-master
//!     timeout: 5m
//! ```
//!
//! or by annotating the object with `kdo.io/rollout-status: "true"`.

use std::time::Duration;

use kdo_core::annotations::{self, is_truthy};
use kdo_core::cluster::readiness::{Rollout, has_rollout};
use kdo_core::{Chart, Cluster, CoreError, Object, Options, Result};
use tokio::time::Instant;

/// A workload to check after apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutTarget {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub timeout: Option<Duration>,
}

impl RolloutTarget {
    /// Workloads are namespaced whatever scope the objects were applied with
    fn options(&self, base: &Options) -> Options {
        let mut options = base.clone();
        options.namespaced = true;
        if let Some(timeout) = self.timeout {
            options.timeout = timeout;
        }
        if let Some(namespace) = &self.namespace {
            options.namespace = Some(namespace.clone());
        }
        options
    }
}

/// Workloads of `chart` to wait for, given the objects just applied.
///
/// Declared checks come first, in declaration order, followed by annotated
/// objects in apply order. Duplicates are dropped.
pub fn targets(chart: &Chart, applied: &[Object]) -> Vec<RolloutTarget> {
    let mut targets: Vec<RolloutTarget> = chart
        .manifest
        .readiness
        .iter()
        .map(|check| RolloutTarget {
            kind: check.kind.clone(),
            name: check.name.clone(),
            namespace: None,
            timeout: check.timeout,
        })
        .collect();

    for object in applied {
        if !is_truthy(object.annotation(annotations::ROLLOUT_STATUS)) {
            continue;
        }
        if !has_rollout(object.kind()) {
            tracing::warn!(object = %object.id(), "rollout-status requested for a kind without rollout");
            continue;
        }
        let duplicate = targets.iter().any(|t| {
            t.kind.eq_ignore_ascii_case(object.kind()) && t.name == object.name()
        });
        if !duplicate {
            targets.push(RolloutTarget {
                kind: object.kind().to_string(),
                name: object.name().to_string(),
                namespace: object.namespace().map(str::to_string),
                timeout: None,
            });
        }
    }
    targets
}

/// Block until every target of `chart` has rolled out. Returns how many
/// workloads were checked.
pub async fn verify(
    chart: &Chart,
    cluster: &dyn Cluster,
    applied: &[Object],
    options: &Options,
) -> Result<usize> {
    let targets = targets(chart, applied);
    for target in &targets {
        tracing::info!(
            chart = chart.name(),
            kind = %target.kind,
            name = %target.name,
            "waiting for rollout"
        );
        cluster
            .rollout_status(&target.kind, &target.name, &target.options(options))
            .await?;
    }
    Ok(targets.len())
}

/// Poll `kind/name` until `check` reports completion, a failure, or the
/// options timeout elapses
pub async fn poll<F>(
    cluster: &dyn Cluster,
    kind: &str,
    name: &str,
    options: &Options,
    interval: Duration,
    mut check: F,
) -> Result<()>
where
    F: FnMut(&Object) -> Rollout + Send,
{
    let started = Instant::now();
    loop {
        let object = cluster
            .get(kind, name, options)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            })?;

        match check(&object) {
            Rollout::Complete => return Ok(()),
            Rollout::Failed(message) => {
                return Err(CoreError::Apply {
                    object: object.id(),
                    message,
                });
            }
            Rollout::Progressing(status) => {
                tracing::debug!(object = %object.id(), %status, "rollout in progress");
            }
        }

        if let Some(limit) = options.deadline()
            && started.elapsed() >= limit
        {
            return Err(CoreError::RolloutTimeout {
                kind: kind.to_string(),
                name: name.to_string(),
                timeout: limit,
            });
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdo_core::{ChartManifest, InMemoryCluster, Values};
    use serde_json::json;

    fn chart(manifest: &str) -> Chart {
        Chart {
            manifest: ChartManifest::from_yaml(manifest).unwrap(),
            root: std::path::PathBuf::from("."),
            namespace: "uaa".to_string(),
            values: Values::new(),
            subcharts: Vec::new(),
            methods: Default::default(),
            jewels: Vec::new(),
        }
    }

    fn statefulset(name: &str, ready: i64) -> Object {
        Object::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": { "name": name },
            "spec": { "replicas": 1 },
            "status": { "readyReplicas": ready, "currentReplicas": ready }
        }))
        .unwrap()
    }

    #[test]
    fn test_targets_merge_declared_and_annotated() {
        let chart = chart(
            "name: uaa\nversion: 1.3.4\nreadiness:\n  - kind: StatefulSet\n    name: uaa-master\n    timeout: 2m\n",
        );
        let applied = vec![
            statefulset("uaa-master", 1).with_annotation(annotations::ROLLOUT_STATUS, "true"),
            Object::new("apps/v1", "Deployment", "uaa-web")
                .with_annotation(annotations::ROLLOUT_STATUS, "yes"),
            Object::new("v1", "ConfigMap", "uaa-config")
                .with_annotation(annotations::ROLLOUT_STATUS, "true"),
            Object::new("apps/v1", "Deployment", "unmarked"),
        ];

        let targets = targets(&chart, &applied);
        let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["uaa-master", "uaa-web"]);
        assert_eq!(targets[0].timeout, Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_poll_reports_missing_object() {
        let cluster = InMemoryCluster::new("uaa");
        let err = poll(
            &cluster,
            "StatefulSet",
            "absent",
            &Options::new(),
            Duration::from_millis(5),
            |_| Rollout::Complete,
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let cluster = InMemoryCluster::new("uaa");
        cluster.insert(statefulset("uaa-master", 0));

        let err = poll(
            &cluster,
            "StatefulSet",
            "uaa-master",
            &Options::new().with_timeout(Duration::from_millis(30)),
            Duration::from_millis(5),
            kdo_core::cluster::readiness::evaluate,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::RolloutTimeout { .. }));
    }

    #[tokio::test]
    async fn test_verify_uses_declared_timeout() {
        let cluster = InMemoryCluster::new("uaa");
        cluster.insert(statefulset("uaa-master", 0));
        let chart = chart(
            "name: uaa\nversion: 1.3.4\nreadiness:\n  - kind: StatefulSet\n    name: uaa-master\n    timeout: 20ms\n",
        );

        let err = verify(&chart, &cluster, &[], &Options::new()).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::RolloutTimeout { timeout, .. } if timeout == Duration::from_millis(20)
        ));
    }

    #[tokio::test]
    async fn test_verify_targets_namespace_after_cluster_scoped_apply() {
        let cluster = InMemoryCluster::new("uaa");
        cluster.insert(statefulset("uaa-master", 0));
        let chart = chart(
            "name: uaa\nversion: 1.3.4\nreadiness:\n  - kind: StatefulSet\n    name: uaa-master\n    timeout: 20ms\n",
        );

        let err = verify(&chart, &cluster, &[], &Options::new().cluster_scoped())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::RolloutTimeout { .. }));
    }
}
