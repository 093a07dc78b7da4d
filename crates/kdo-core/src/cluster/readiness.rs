//! Rollout evaluation of workload objects
//!
//! A workload has finished rolling out when:
//! - Deployment: all replicas updated, ready and available, and the
//!   controller has observed the latest generation
//! - StatefulSet: all replicas ready and current, and the current revision
//!   matches the update revision
//! - DaemonSet: every scheduled pod ready and updated
//! - Job: at least one pod succeeded
//!
//! Other kinds have no rollout and are always complete.

use serde_json::Value as JsonValue;

use crate::object::Object;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollout {
    Complete,
    Progressing(String),
    Failed(String),
}

impl Rollout {
    pub fn is_complete(&self) -> bool {
        matches!(self, Rollout::Complete)
    }
}

/// Kinds with a rollout to wait for
pub const ROLLOUT_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "Job"];

pub fn has_rollout(kind: &str) -> bool {
    ROLLOUT_KINDS.iter().any(|k| k.eq_ignore_ascii_case(kind))
}

pub fn evaluate(object: &Object) -> Rollout {
    match object.kind().to_ascii_lowercase().as_str() {
        "deployment" => deployment(object),
        "statefulset" => statefulset(object),
        "daemonset" => daemonset(object),
        "job" => job(object),
        _ => Rollout::Complete,
    }
}

/// Whether `status.conditions` has `condition` with status `True`
pub fn has_condition(object: &Object, condition: &str) -> bool {
    conditions(object).any(|c| {
        c.get("type").and_then(JsonValue::as_str) == Some(condition)
            && c.get("status").and_then(JsonValue::as_str) == Some("True")
    })
}

fn conditions(object: &Object) -> impl Iterator<Item = &JsonValue> {
    object
        .get("status.conditions")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
}

fn int(object: &Object, path: &str) -> Option<i64> {
    object.get(path).and_then(JsonValue::as_i64)
}

fn generation_observed(object: &Object) -> bool {
    match (
        int(object, "metadata.generation"),
        int(object, "status.observedGeneration"),
    ) {
        (Some(generation), Some(observed)) => observed >= generation,
        _ => true,
    }
}

fn deployment(object: &Object) -> Rollout {
    if !generation_observed(object) {
        return Rollout::Progressing("waiting for the controller to observe the spec".into());
    }
    let desired = int(object, "spec.replicas").unwrap_or(1);
    let ready = int(object, "status.readyReplicas").unwrap_or(0);
    let updated = int(object, "status.updatedReplicas").unwrap_or(0);
    let available = int(object, "status.availableReplicas").unwrap_or(0);

    if ready == desired && updated == desired && available == desired {
        Rollout::Complete
    } else {
        Rollout::Progressing(format!(
            "{}/{} ready, {}/{} updated, {}/{} available",
            ready, desired, updated, desired, available, desired
        ))
    }
}

fn statefulset(object: &Object) -> Rollout {
    if !generation_observed(object) {
        return Rollout::Progressing("waiting for the controller to observe the spec".into());
    }
    let desired = int(object, "spec.replicas").unwrap_or(1);
    let ready = int(object, "status.readyReplicas").unwrap_or(0);
    let current = int(object, "status.currentReplicas").unwrap_or(0);
    let current_rev = object.get("status.currentRevision");
    let update_rev = object.get("status.updateRevision");
    let revision_match = current_rev == update_rev;

    if ready == desired && current == desired && revision_match {
        Rollout::Complete
    } else {
        Rollout::Progressing(format!(
            "{}/{} ready, {}/{} current, revision match: {}",
            ready, desired, current, desired, revision_match
        ))
    }
}

fn daemonset(object: &Object) -> Rollout {
    let desired = int(object, "status.desiredNumberScheduled").unwrap_or(0);
    let ready = int(object, "status.numberReady").unwrap_or(0);
    let updated = int(object, "status.updatedNumberScheduled").unwrap_or(0);

    if ready == desired && updated == desired && desired > 0 {
        Rollout::Complete
    } else {
        Rollout::Progressing(format!(
            "{}/{} ready, {}/{} updated",
            ready, desired, updated, desired
        ))
    }
}

fn job(object: &Object) -> Rollout {
    let succeeded = int(object, "status.succeeded").unwrap_or(0);
    let failed = int(object, "status.failed").unwrap_or(0);
    let active = int(object, "status.active").unwrap_or(0);

    if has_condition(object, "Failed") || (failed > 0 && active == 0) {
        let reason = conditions(object)
            .find(|c| c.get("type").and_then(JsonValue::as_str) == Some("Failed"))
            .and_then(|c| c.get("message").and_then(JsonValue::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| format!("job failed with {} failures", failed));
        return Rollout::Failed(reason);
    }
    if succeeded > 0 {
        Rollout::Complete
    } else {
        Rollout::Progressing(format!("{} active, {} succeeded", active, succeeded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: JsonValue) -> Object {
        Object::from_value(value).unwrap()
    }

    #[test]
    fn test_statefulset_rollout() {
        let progressing = obj(json!({
            "kind": "StatefulSet",
            "metadata": { "name": "uaa-master" },
            "spec": { "replicas": 2 },
            "status": { "readyReplicas": 2, "currentReplicas": 2,
                        "currentRevision": "r1", "updateRevision": "r2" }
        }));
        assert!(matches!(evaluate(&progressing), Rollout::Progressing(_)));

        let done = obj(json!({
            "kind": "StatefulSet",
            "metadata": { "name": "uaa-master" },
            "spec": { "replicas": 2 },
            "status": { "readyReplicas": 2, "currentReplicas": 2,
                        "currentRevision": "r2", "updateRevision": "r2" }
        }));
        assert!(evaluate(&done).is_complete());
    }

    #[test]
    fn test_deployment_waits_for_observed_generation() {
        let stale = obj(json!({
            "kind": "Deployment",
            "metadata": { "name": "web", "generation": 3 },
            "spec": { "replicas": 1 },
            "status": { "observedGeneration": 2, "readyReplicas": 1,
                        "updatedReplicas": 1, "availableReplicas": 1 }
        }));
        assert!(!evaluate(&stale).is_complete());
    }

    #[test]
    fn test_failed_job() {
        let failed = obj(json!({
            "kind": "Job",
            "metadata": { "name": "migrate" },
            "status": { "failed": 1, "conditions": [
                { "type": "Failed", "status": "True", "message": "BackoffLimitExceeded" }
            ] }
        }));
        assert_eq!(
            evaluate(&failed),
            Rollout::Failed("BackoffLimitExceeded".to_string())
        );
    }

    #[test]
    fn test_other_kinds_are_complete() {
        assert!(evaluate(&Object::new("v1", "ConfigMap", "c")).is_complete());
        assert!(!has_rollout("ConfigMap"));
        assert!(has_rollout("statefulset"));
    }
}
