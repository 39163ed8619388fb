//! Kind-priority ordering of definitions.
//!
//! Apply order follows the kind priority below, so that namespaces & policies exist before the
//! objects depending on them, and admission webhooks are only registered once the workloads
//! serving them exist. Delete order is the exact reverse.

use crate::manifests::Definition;

/// Kinds in apply order. Kinds not listed rank after all listed kinds, but before webhooks.
const KIND_PRIORITY: &[&str] = &[
    "Namespace",
    "NetworkPolicy",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "ServiceAccount",
    "Secret",
    "SecretList",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleList",
    "ClusterRoleBinding",
    "ClusterRoleBindingList",
    "Role",
    "RoleList",
    "RoleBinding",
    "RoleBindingList",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "Ingress",
    "APIService",
];

/// Kinds applied after everything else.
const WEBHOOK_KINDS: &[&str] = &["MutatingWebhookConfiguration", "ValidatingWebhookConfiguration"];

/// The apply rank of the given kind.
pub fn kind_rank(kind: &str) -> usize {
    if let Some(pos) = KIND_PRIORITY.iter().position(|k| *k == kind) {
        return pos;
    }
    match WEBHOOK_KINDS.iter().position(|k| *k == kind) {
        Some(pos) => KIND_PRIORITY.len() + 1 + pos,
        None => KIND_PRIORITY.len(),
    }
}

/// Sort the given definitions into apply order.
///
/// Definitions of equal rank are ordered by kind, and the sort is stable within a kind.
pub fn sort_for_apply(defs: &mut [Definition]) {
    defs.sort_by(|a, b| (kind_rank(a.kind()), a.kind()).cmp(&(kind_rank(b.kind()), b.kind())));
}

/// Sort the given definitions into delete order, the exact reverse of apply order.
pub fn sort_for_delete(defs: &mut [Definition]) {
    sort_for_apply(defs);
    defs.reverse();
}
