use anyhow::{bail, Result};
use serde_json::Value;

use crate::manifests::{Definition, Transformer};

/// The `(apiVersion, kind)` pairs of scalable workloads.
const SCALABLE_KINDS: &[(&str, &str)] = &[
    ("apps/v1", "Deployment"),
    ("apps/v1", "StatefulSet"),
    ("apps/v1", "ReplicaSet"),
    ("v1", "ReplicationController"),
];

fn is_scalable(api_version: &str, kind: &str) -> bool {
    SCALABLE_KINDS.iter().any(|(v, k)| *v == api_version && *k == kind)
}

/// Set `.spec.replicas` of the named, namespaced scalable workload.
///
/// Fails if the given kind is not scalable.
pub fn scale(api_version: &str, kind: &str, namespace: &str, name: &str, replicas: i32) -> Result<Transformer> {
    if !is_scalable(api_version, kind) {
        bail!("{} {} is not a scalable kind", api_version, kind);
    }
    let (api_version, kind, namespace, name) = (api_version.to_string(), kind.to_string(), namespace.to_string(), name.to_string());
    Ok(Transformer::new(format!("scale {}/{} to {}", namespace, name, replicas), move |def: &mut Definition| {
        if def.api_version() != api_version || !def.is(&kind, &namespace, &name) {
            return Ok(());
        }
        def.set(&["spec", "replicas"], Value::from(replicas))
    }))
}

/// Set `.spec.minReplicas` of the named autoscaler, shifting `.spec.maxReplicas` by the same
/// delta so that the minimum never exceeds the maximum.
pub fn hpa_replicas(namespace: &str, name: &str, min_replicas: i32) -> Transformer {
    let (namespace, name) = (namespace.to_string(), name.to_string());
    Transformer::new(format!("autoscaler {}/{} min replicas {}", namespace, name, min_replicas), move |def: &mut Definition| {
        if !def.is("HorizontalPodAutoscaler", &namespace, &name) {
            return Ok(());
        }
        set_hpa_min_replicas(def, min_replicas.into())
    })
}

/// Set the minimum replicas of an autoscaler definition, shifting its maximum by the same delta.
pub(super) fn set_hpa_min_replicas(def: &mut Definition, min_replicas: i64) -> Result<()> {
    // An absent minimum defaults to 1 in K8s.
    let old_min = def.i64_at(&["spec", "minReplicas"]).unwrap_or(1);
    def.set(&["spec", "minReplicas"], Value::from(min_replicas))?;
    if let Some(max) = def.i64_at(&["spec", "maxReplicas"]) {
        def.set(&["spec", "maxReplicas"], Value::from(max + (min_replicas - old_min)))?;
    }
    Ok(())
}
