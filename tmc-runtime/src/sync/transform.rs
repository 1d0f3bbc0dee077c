//! Resource transformer (C5, §4.5): an ordered pipeline of rules applied
//! to an object as it crosses the workspace/cluster boundary.

use tmc_core::error::Error;
use tmc_core::model::Direction;
use tmc_core::{Gvr, Object};

/// Outcome of running an object through the [`Pipeline`].
pub enum TransformOutcome {
    /// The object survived transformation and should be synced.
    Transformed(Object),
    /// A rule decided this object should not be synced at all.
    Skip(String),
}

/// A single transformation rule. Higher [`Rule::priority`] runs first; on
/// a tie, declaration order in the [`Pipeline`] is preserved.
pub trait Rule: Send + Sync {
    /// Execution priority; higher runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether this rule applies to `obj`/`gvr`/`direction`.
    fn matches(&self, gvr: &Gvr, obj: &Object, direction: Direction) -> bool;

    /// Transforms (or skips) `obj`. Only called when [`Rule::matches`]
    /// returned true.
    fn apply(
        &self,
        source_workspace: &str,
        target_workspace: &str,
        obj: Object,
        direction: Direction,
    ) -> Result<TransformOutcome, Error>;
}

/// An ordered list of [`Rule`]s run in sequence; any rule that decides to
/// skip short-circuits the remaining rules.
#[derive(Default)]
pub struct Pipeline {
    rules: Vec<Box<dyn Rule>>,
}

impl Pipeline {
    /// An empty pipeline.
    pub fn new() -> Self {
        Pipeline::default()
    }

    /// Appends a rule, then re-sorts by descending priority (stable, so
    /// ties keep declaration order).
    pub fn add_rule(mut self, rule: Box<dyn Rule>) -> Self {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority().cmp(&a.priority()));
        self
    }

    /// Runs `obj` through every matching rule in priority order.
    pub fn run(
        &self,
        gvr: &Gvr,
        source_workspace: &str,
        target_workspace: &str,
        direction: Direction,
        mut obj: Object,
    ) -> Result<TransformOutcome, Error> {
        for rule in &self.rules {
            if !rule.matches(gvr, &obj, direction) {
                continue;
            }
            match rule.apply(source_workspace, target_workspace, obj, direction)? {
                TransformOutcome::Transformed(next) => obj = next,
                skip @ TransformOutcome::Skip(_) => return Ok(skip),
            }
        }
        Ok(TransformOutcome::Transformed(obj))
    }
}

fn resource_is(gvr: &Gvr, plural: &str) -> bool {
    gvr.resource == plural
}

/// Pods: skip terminal `Failed`/`Unknown` pods, and skip system pods whose
/// name starts with `kube-` or `coredns`.
pub struct PodRule;
impl Rule for PodRule {
    fn matches(&self, gvr: &Gvr, _obj: &Object, direction: Direction) -> bool {
        resource_is(gvr, "pods") && direction == Direction::Downstream
    }

    fn apply(&self, _s: &str, _t: &str, obj: Object, _d: Direction) -> Result<TransformOutcome, Error> {
        let phase = obj.nested_string(&["status", "phase"]).unwrap_or_default();
        if phase == "Failed" || phase == "Unknown" {
            return Ok(TransformOutcome::Skip(format!("pod phase {phase}")));
        }
        let name = obj.name().unwrap_or_default();
        if name.starts_with("kube-") || name.starts_with("coredns") {
            return Ok(TransformOutcome::Skip(format!("system pod {name}")));
        }
        Ok(TransformOutcome::Transformed(obj))
    }
}

/// Services: clear `spec.clusterIP`/`spec.clusterIPs` so the target
/// cluster assigns its own.
pub struct ServiceRule;
impl Rule for ServiceRule {
    fn matches(&self, gvr: &Gvr, _obj: &Object, direction: Direction) -> bool {
        resource_is(gvr, "services") && direction == Direction::Downstream
    }

    fn apply(&self, _s: &str, _t: &str, mut obj: Object, _d: Direction) -> Result<TransformOutcome, Error> {
        obj.remove_nested(&["spec", "clusterIP"]);
        obj.remove_nested(&["spec", "clusterIPs"]);
        Ok(TransformOutcome::Transformed(obj))
    }
}

/// ConfigMaps: skip `kube-*` and `cluster-info`.
pub struct ConfigMapRule;
impl Rule for ConfigMapRule {
    fn matches(&self, gvr: &Gvr, _obj: &Object, direction: Direction) -> bool {
        resource_is(gvr, "configmaps") && direction == Direction::Downstream
    }

    fn apply(&self, _s: &str, _t: &str, obj: Object, _d: Direction) -> Result<TransformOutcome, Error> {
        let name = obj.name().unwrap_or_default();
        if name.starts_with("kube-") || name == "cluster-info" {
            return Ok(TransformOutcome::Skip(format!("system configmap {name}")));
        }
        Ok(TransformOutcome::Transformed(obj))
    }
}

/// Deployments/ReplicaSets/StatefulSets/DaemonSets: identity transform.
pub struct WorkloadIdentityRule;
impl Rule for WorkloadIdentityRule {
    fn matches(&self, gvr: &Gvr, _obj: &Object, direction: Direction) -> bool {
        direction == Direction::Downstream
            && ["deployments", "replicasets", "statefulsets", "daemonsets"].contains(&gvr.resource.as_str())
    }

    fn apply(&self, _s: &str, _t: &str, obj: Object, _d: Direction) -> Result<TransformOutcome, Error> {
        Ok(TransformOutcome::Transformed(obj))
    }
}

/// Nodes: scrub hardware/identity fields that shouldn't leak between clusters.
pub struct NodeRule;
impl Rule for NodeRule {
    fn matches(&self, gvr: &Gvr, _obj: &Object, direction: Direction) -> bool {
        resource_is(gvr, "nodes") && direction == Direction::Downstream
    }

    fn apply(&self, _s: &str, _t: &str, mut obj: Object, _d: Direction) -> Result<TransformOutcome, Error> {
        obj.remove_nested(&["status", "nodeInfo", "machineID"]);
        obj.remove_nested(&["status", "nodeInfo", "systemUUID"]);
        obj.remove_nested(&["status", "addresses"]);
        Ok(TransformOutcome::Transformed(obj))
    }
}

/// Ingresses: clear `status.loadBalancer` so the target cluster's own
/// ingress controller can populate it.
pub struct IngressRule;
impl Rule for IngressRule {
    fn matches(&self, gvr: &Gvr, _obj: &Object, direction: Direction) -> bool {
        resource_is(gvr, "ingresses") && direction == Direction::Downstream
    }

    fn apply(&self, _s: &str, _t: &str, mut obj: Object, _d: Direction) -> Result<TransformOutcome, Error> {
        obj.remove_nested(&["status", "loadBalancer"]);
        Ok(TransformOutcome::Transformed(obj))
    }
}

/// Builds the default downstream pipeline described in §4.5.
pub fn default_downstream_pipeline() -> Pipeline {
    Pipeline::new()
        .add_rule(Box::new(PodRule))
        .add_rule(Box::new(ServiceRule))
        .add_rule(Box::new(ConfigMapRule))
        .add_rule(Box::new(WorkloadIdentityRule))
        .add_rule(Box::new(NodeRule))
        .add_rule(Box::new(IngressRule))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: serde_json::Value) -> Object {
        Object::from_json(v).unwrap()
    }

    #[test]
    fn skips_failed_pod() {
        let pipeline = default_downstream_pipeline();
        let gvr = Gvr::new("", "v1", "pods");
        let pod = obj(json!({"metadata": {"name": "app-1"}, "status": {"phase": "Failed"}}));
        let out = pipeline.run(&gvr, "ws", "ws", Direction::Downstream, pod).unwrap();
        assert!(matches!(out, TransformOutcome::Skip(_)));
    }

    #[test]
    fn skips_system_pod_by_name() {
        let pipeline = default_downstream_pipeline();
        let gvr = Gvr::new("", "v1", "pods");
        let pod = obj(json!({"metadata": {"name": "coredns-abc"}, "status": {"phase": "Running"}}));
        let out = pipeline.run(&gvr, "ws", "ws", Direction::Downstream, pod).unwrap();
        assert!(matches!(out, TransformOutcome::Skip(_)));
    }

    #[test]
    fn service_clears_cluster_ip() {
        let pipeline = default_downstream_pipeline();
        let gvr = Gvr::new("", "v1", "services");
        let svc = obj(json!({"metadata": {"name": "svc"}, "spec": {"clusterIP": "10.0.0.1", "ports": []}}));
        let out = pipeline.run(&gvr, "ws", "ws", Direction::Downstream, svc).unwrap();
        let TransformOutcome::Transformed(result) = out else { panic!("expected transformed") };
        assert_eq!(result.nested_string(&["spec", "clusterIP"]), None);
        assert!(result.nested_slice(&["spec", "ports"]).is_some());
    }

    #[test]
    fn deployment_is_identity() {
        let pipeline = default_downstream_pipeline();
        let gvr = Gvr::new("apps", "v1", "deployments");
        let dep = obj(json!({"metadata": {"name": "web"}, "spec": {"replicas": 3}}));
        let out = pipeline.run(&gvr, "ws", "ws", Direction::Downstream, dep.clone()).unwrap();
        let TransformOutcome::Transformed(result) = out else { panic!("expected transformed") };
        assert_eq!(result, dep);
    }

    #[test]
    fn node_scrubs_identity_fields() {
        let pipeline = default_downstream_pipeline();
        let gvr = Gvr::new("", "v1", "nodes");
        let node = obj(json!({
            "metadata": {"name": "node-1"},
            "status": {"nodeInfo": {"machineID": "abc", "systemUUID": "xyz"}, "addresses": [{"type": "InternalIP"}]}
        }));
        let out = pipeline.run(&gvr, "ws", "ws", Direction::Downstream, node).unwrap();
        let TransformOutcome::Transformed(result) = out else { panic!("expected transformed") };
        assert_eq!(result.nested_string(&["status", "nodeInfo", "machineID"]), None);
        assert_eq!(result.nested_slice(&["status", "addresses"]), None);
    }
}
