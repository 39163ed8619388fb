use std::collections::BTreeMap;

use anyhow::{bail, Result};
use eventmesh_core::crd::{ProbeOverride, WorkloadOverride};
use serde_json::{Map, Value};

use crate::config::AutoscalerTable;
use crate::manifests::transform::scale::set_hpa_min_replicas;
use crate::manifests::{Definition, Transformer};

const POD_SPEC: &[&str] = &["spec", "template", "spec"];

/// Apply user provided workload overrides.
///
/// Deployments & StatefulSets are matched by name, Jobs by their generate name. A replica
/// override of an autoscaled workload is applied to its autoscaler of the given namespace instead
/// of the workload.
pub fn workloads_override(namespace: &str, overrides: Vec<WorkloadOverride>, autoscalers: AutoscalerTable) -> Transformer {
    let namespace = namespace.to_string();
    Transformer::new("workload overrides", move |def: &mut Definition| {
        if def.kind() == "HorizontalPodAutoscaler" {
            for o in overrides.iter() {
                if let Some(replicas) = o.replicas {
                    if autoscalers.is_autoscaled(&o.name) && def.is("HorizontalPodAutoscaler", &namespace, autoscalers.hpa_name(&o.name)) {
                        set_hpa_min_replicas(def, replicas.into())?;
                    }
                }
            }
            return Ok(());
        }

        let o = match overrides.iter().find(|o| targets(def, &o.name)) {
            Some(o) => o,
            None => return Ok(()),
        };
        if let Some(replicas) = o.replicas {
            if def.kind() != "Job" && !autoscalers.is_autoscaled(&o.name) {
                def.set(&["spec", "replicas"], Value::from(replicas))?;
            }
        }
        merge_string_map(def, &["metadata", "labels"], &o.labels)?;
        merge_string_map(def, &["spec", "template", "metadata", "labels"], &o.labels)?;
        merge_string_map(def, &["metadata", "annotations"], &o.annotations)?;
        merge_string_map(def, &["spec", "template", "metadata", "annotations"], &o.annotations)?;
        apply_pod_spec(def, o)
    })
}

/// Check if the given definition is the workload of the given override name.
fn targets(def: &Definition, name: &str) -> bool {
    match def.kind() {
        "Deployment" | "StatefulSet" => def.name() == name,
        "Job" => def.generate_name() == name,
        _ => false,
    }
}

fn pod_path(field: &str) -> Vec<&str> {
    let mut path: Vec<&str> = POD_SPEC.to_vec();
    path.push(field);
    path
}

fn apply_pod_spec(def: &mut Definition, o: &WorkloadOverride) -> Result<()> {
    if !o.node_selector.is_empty() {
        let selector: Map<String, Value> = o.node_selector.iter().map(|(k, v)| (k.clone(), Value::from(v.as_str()))).collect();
        def.set(&pod_path("nodeSelector"), Value::Object(selector))?;
    }
    if !o.topology_spread_constraints.is_empty() {
        def.set(&pod_path("topologySpreadConstraints"), Value::Array(o.topology_spread_constraints.clone()))?;
    }
    if !o.tolerations.is_empty() {
        def.set(&pod_path("tolerations"), Value::Array(o.tolerations.clone()))?;
    }
    if let Some(affinity) = &o.affinity {
        def.set(&pod_path("affinity"), affinity.clone())?;
    }
    if let Some(host_network) = o.host_network {
        def.set(&pod_path("hostNetwork"), Value::Bool(host_network))?;
        if host_network {
            def.set(&pod_path("dnsPolicy"), Value::from("ClusterFirstWithHostNet"))?;
        }
    }

    for res in o.resources.iter() {
        if let Some(container) = container_mut(def, &res.container)? {
            merge_object(container, &["resources", "limits"], &res.limits)?;
            merge_object(container, &["resources", "requests"], &res.requests)?;
        }
    }
    for env in o.env.iter() {
        if let Some(container) = container_mut(def, &env.container)? {
            merge_env(container, &env.env_vars)?;
        }
    }
    for probe in o.readiness_probes.iter() {
        if let Some(container) = container_mut(def, &probe.container)? {
            override_probe(container, "readinessProbe", probe)?;
        }
    }
    for probe in o.liveness_probes.iter() {
        if let Some(container) = container_mut(def, &probe.container)? {
            override_probe(container, "livenessProbe", probe)?;
        }
    }
    Ok(())
}

/// Get the named container of the pod template, if present.
fn container_mut<'a>(def: &'a mut Definition, name: &str) -> Result<Option<&'a mut Map<String, Value>>> {
    let containers = match def.get_mut(&pod_path("containers")) {
        Some(Value::Array(containers)) => containers,
        Some(_) => bail!("pod template containers is not a list"),
        None => return Ok(None),
    };
    Ok(containers
        .iter_mut()
        .filter_map(Value::as_object_mut)
        .find(|container| container.get("name").and_then(Value::as_str) == Some(name)))
}

fn merge_string_map(def: &mut Definition, path: &[&str], values: &BTreeMap<String, String>) -> Result<()> {
    for (key, val) in values.iter() {
        let mut full: Vec<&str> = path.to_vec();
        full.push(key.as_str());
        def.set(&full, Value::from(val.as_str()))?;
    }
    Ok(())
}

/// Merge the given string values into the object at the given path of a container.
fn merge_object(container: &mut Map<String, Value>, path: &[&str], values: &BTreeMap<String, String>) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    let mut current = container;
    for key in path {
        let entry = current.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));
        if entry.is_null() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(obj) => obj,
            _ => bail!("expected an object at {}", path.join(".")),
        };
    }
    for (key, val) in values.iter() {
        current.insert(key.clone(), Value::from(val.as_str()));
    }
    Ok(())
}

/// Merge env vars into a container by name, replacing vars of the same name.
fn merge_env(container: &mut Map<String, Value>, vars: &[Value]) -> Result<()> {
    let env = container.entry("env").or_insert_with(|| Value::Array(vec![]));
    if env.is_null() {
        *env = Value::Array(vec![]);
    }
    let env = match env {
        Value::Array(env) => env,
        _ => bail!("expected a list of env vars"),
    };
    for var in vars {
        let name = var.get("name").and_then(Value::as_str);
        match env.iter_mut().find(|existing| name.is_some() && existing.get("name").and_then(Value::as_str) == name) {
            Some(existing) => *existing = var.clone(),
            None => env.push(var.clone()),
        }
    }
    Ok(())
}

/// Override a probe of a container. An empty override removes the probe.
fn override_probe(container: &mut Map<String, Value>, field: &str, probe: &ProbeOverride) -> Result<()> {
    if probe.is_empty() {
        container.remove(field);
        return Ok(());
    }
    let target = container.entry(field.to_string()).or_insert_with(|| Value::Object(Map::new()));
    if target.is_null() {
        *target = Value::Object(Map::new());
    }
    let target = match target {
        Value::Object(obj) => obj,
        _ => bail!("expected an object at {}", field),
    };
    let fields: [(&str, Option<i64>); 6] = [
        ("initialDelaySeconds", probe.initial_delay_seconds.map(i64::from)),
        ("timeoutSeconds", probe.timeout_seconds.map(i64::from)),
        ("periodSeconds", probe.period_seconds.map(i64::from)),
        ("successThreshold", probe.success_threshold.map(i64::from)),
        ("failureThreshold", probe.failure_threshold.map(i64::from)),
        ("terminationGracePeriodSeconds", probe.termination_grace_period_seconds),
    ];
    for (key, val) in fields.iter() {
        if let Some(val) = val {
            target.insert(key.to_string(), Value::from(*val));
        }
    }
    Ok(())
}
