//! EventMesh CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::FEATURE_TRANSPORT_ENCRYPTION;

pub type EventMesh = EventMeshCRD; // Mostly to resolve a Rust Analyzer issue.

/// The condition type reporting whether the manifests have been installed.
pub const CONDITION_INSTALLED: &str = "EventMeshInstalled";
/// The condition type reporting whether all installed deployments are available.
pub const CONDITION_DEPLOYMENTS_AVAILABLE: &str = "DeploymentsAvailable";
/// The top-level condition type, derived from all other conditions.
pub const CONDITION_READY: &str = "Ready";

/// All conditions which contribute to the top-level `Ready` condition.
const DEPENDENT_CONDITIONS: [&str; 2] = [CONDITION_INSTALLED, CONDITION_DEPLOYMENTS_AVAILABLE];

/// CRD spec for the EventMesh resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    struct = "EventMeshCRD",
    status = "EventMeshStatus",
    group = "operator.knative.dev",
    version = "v1alpha1",
    kind = "EventMesh",
    namespaced,
    derive = "PartialEq",
    apiextensions = "v1",
    shortname = "em",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EventMeshSpec {
    /// Connection parameters of the Kafka backend.
    #[serde(default)]
    pub kafka: KafkaSpec,
    /// The log level applied to all installed components.
    #[serde(default)]
    pub log_level: LogLevel,
    /// The cluster default broker class. Defaults to `Kafka`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_broker: Option<BrokerClass>,
    /// The cluster default channel implementation. Defaults to `KafkaChannel`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<ChannelImplementation>,
    /// Eventing feature flags, written verbatim to the `config-features` ConfigMap.
    #[serde(default)]
    pub features: BTreeMap<String, String>,
    /// Overrides applied to the installed ConfigMaps and workloads.
    #[serde(default)]
    pub overrides: Overrides,
}

impl EventMeshSpec {
    /// Check if transport encryption is disabled.
    ///
    /// An absent flag is treated as disabled.
    pub fn is_transport_encryption_disabled(&self) -> bool {
        match self.features.get(FEATURE_TRANSPORT_ENCRYPTION) {
            Some(val) => val.eq_ignore_ascii_case("disabled"),
            None => true,
        }
    }

    /// Get the workload override for the workload of the given name, if any.
    pub fn workload_override(&self, name: &str) -> Option<&WorkloadOverride> {
        self.overrides.workloads.iter().find(|o| o.name == name)
    }

    /// Get the replica count explicitly requested by a workload override, if any.
    pub fn replicas_override(&self, name: &str) -> Option<i32> {
        self.workload_override(name).and_then(|o| o.replicas)
    }

    /// The effective default broker class.
    pub fn default_broker(&self) -> BrokerClass {
        self.default_broker.unwrap_or(BrokerClass::Kafka)
    }

    /// The effective default channel implementation.
    pub fn default_channel(&self) -> ChannelImplementation {
        self.default_channel.unwrap_or(ChannelImplementation::KafkaChannel)
    }
}

impl EventMeshCRD {
    /// Build an owner reference pointing at this object.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: Self::api_version(&()).into_owned(),
            kind: Self::kind(&()).into_owned(),
            name: self.meta().name.clone().unwrap_or_default(),
            uid: self.meta().uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Connection parameters of the Kafka backend.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaSpec {
    /// The Kafka bootstrap servers.
    #[serde(default)]
    pub bootstrap_servers: Vec<String>,
    /// The default number of partitions of created topics.
    #[serde(default = "KafkaSpec::num_partitions_default")]
    pub num_partitions: i32,
    /// The default replication factor of created topics.
    #[serde(default = "KafkaSpec::replication_factor_default")]
    pub replication_factor: i32,
    /// Additional default topic configuration, e.g. `retention.ms`.
    #[serde(default)]
    pub topic_config_options: BTreeMap<String, String>,
}

impl KafkaSpec {
    pub fn num_partitions_default() -> i32 {
        3
    }

    pub fn replication_factor_default() -> i32 {
        1
    }
}

impl Default for KafkaSpec {
    fn default() -> Self {
        Self {
            bootstrap_servers: vec![],
            num_partitions: Self::num_partitions_default(),
            replication_factor: Self::replication_factor_default(),
            topic_config_options: Default::default(),
        }
    }
}

/// The log level applied to the installed components.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    /// The equivalent zap level. Zap has no trace level, so trace maps to debug.
    pub fn zap_level(&self) -> &'static str {
        match self {
            Self::Trace | Self::Debug => "debug",
            other => other.as_str(),
        }
    }

    /// The equivalent logback level.
    pub fn logback_level(&self) -> String {
        self.as_str().to_uppercase()
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The supported broker classes.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum BrokerClass {
    Kafka,
    #[serde(rename = "MTChannelBasedBroker")]
    MtChannelBased,
}

impl BrokerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kafka => "Kafka",
            Self::MtChannelBased => "MTChannelBasedBroker",
        }
    }

    /// The other supported broker class.
    pub fn alternative(&self) -> Self {
        match self {
            Self::Kafka => Self::MtChannelBased,
            Self::MtChannelBased => Self::Kafka,
        }
    }
}

impl std::fmt::Display for BrokerClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The supported channel implementations.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum ChannelImplementation {
    KafkaChannel,
    InMemoryChannel,
}

impl ChannelImplementation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KafkaChannel => "KafkaChannel",
            Self::InMemoryChannel => "InMemoryChannel",
        }
    }
}

impl std::fmt::Display for ChannelImplementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Overrides applied to the installed ConfigMaps and workloads.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Overrides {
    /// ConfigMap data overrides keyed by ConfigMap name. The `config-` prefix is optional.
    #[serde(default)]
    pub config: BTreeMap<String, BTreeMap<String, String>>,
    /// Workload overrides.
    #[serde(default)]
    pub workloads: Vec<WorkloadOverride>,
}

/// An override of the shape of a named workload.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadOverride {
    /// The name of the Deployment or StatefulSet, or the generate name of a Job.
    pub name: String,
    /// Labels set on the workload and its pod template.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations set on the workload and its pod template.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// The replica count of the workload.
    ///
    /// For autoscaled workloads this sets the autoscaler's minimum instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    #[schemars(schema_with = "super::opaque_object_list")]
    pub topology_spread_constraints: Vec<serde_json::Value>,
    #[serde(default)]
    #[schemars(schema_with = "super::opaque_object_list")]
    pub tolerations: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "super::opaque_object")]
    pub affinity: Option<serde_json::Value>,
    #[serde(default)]
    pub resources: Vec<ResourceRequirementsOverride>,
    #[serde(default)]
    pub env: Vec<EnvRequirementsOverride>,
    #[serde(default)]
    pub readiness_probes: Vec<ProbeOverride>,
    #[serde(default)]
    pub liveness_probes: Vec<ProbeOverride>,
    /// Run the pods on the host network. Enabling it also sets the DNS policy to `ClusterFirstWithHostNet`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,
}

/// Resource requests & limits of a container.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsOverride {
    pub container: String,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

/// Env vars of a container, merged by name.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvRequirementsOverride {
    pub container: String,
    #[serde(default)]
    #[schemars(schema_with = "super::opaque_object_list")]
    pub env_vars: Vec<serde_json::Value>,
}

/// Probe timings of a container. An override with no fields set disables the probe.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOverride {
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

impl ProbeOverride {
    /// Check if no probe field is set.
    pub fn is_empty(&self) -> bool {
        self.initial_delay_seconds.is_none()
            && self.timeout_seconds.is_none()
            && self.period_seconds.is_none()
            && self.success_threshold.is_none()
            && self.failure_threshold.is_none()
            && self.termination_grace_period_seconds.is_none()
    }
}

/// CRD status object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventMeshStatus {
    /// The generation of the spec last processed by the operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A status condition.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// RFC 3339 timestamp of the last status change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// The status of a condition.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl EventMeshStatus {
    /// Set all unset conditions to `Unknown`.
    pub fn initialize_conditions(&mut self) {
        for type_ in DEPENDENT_CONDITIONS.iter().chain(std::iter::once(&CONDITION_READY)) {
            if self.get_condition(type_).is_none() {
                self.set_condition(type_, ConditionStatus::Unknown, None, None);
            }
        }
        self.recompute_ready();
    }

    /// Get the condition of the given type, if present.
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Check if the top-level condition is true.
    pub fn is_ready(&self) -> bool {
        matches!(self.get_condition(CONDITION_READY), Some(cond) if cond.status == ConditionStatus::True)
    }

    pub fn mark_install_succeeded(&mut self) {
        self.set_condition(CONDITION_INSTALLED, ConditionStatus::True, None, None);
        self.recompute_ready();
    }

    pub fn mark_install_failed(&mut self, reason: &str, message: impl Into<String>) {
        self.set_condition(CONDITION_INSTALLED, ConditionStatus::False, Some(reason.into()), Some(message.into()));
        self.recompute_ready();
    }

    pub fn mark_deployments_available(&mut self) {
        self.set_condition(CONDITION_DEPLOYMENTS_AVAILABLE, ConditionStatus::True, None, None);
        self.recompute_ready();
    }

    pub fn mark_deployments_not_ready(&mut self, reason: &str, message: impl Into<String>) {
        self.set_condition(CONDITION_DEPLOYMENTS_AVAILABLE, ConditionStatus::False, Some(reason.into()), Some(message.into()));
        self.recompute_ready();
    }

    /// Derive the `Ready` condition from all dependent conditions.
    fn recompute_ready(&mut self) {
        let dependents: Vec<_> = DEPENDENT_CONDITIONS.iter().map(|type_| self.get_condition(type_).cloned()).collect();
        if let Some(failed) = dependents.iter().flatten().find(|c| c.status == ConditionStatus::False) {
            let (reason, message) = (failed.reason.clone(), failed.message.clone());
            self.set_condition(CONDITION_READY, ConditionStatus::False, reason, message);
        } else if dependents.iter().all(|c| matches!(c, Some(c) if c.status == ConditionStatus::True)) {
            self.set_condition(CONDITION_READY, ConditionStatus::True, None, None);
        } else {
            self.set_condition(CONDITION_READY, ConditionStatus::Unknown, None, None);
        }
    }

    /// Set a condition, only bumping its transition time when its status changes.
    fn set_condition(&mut self, type_: &str, status: ConditionStatus, reason: Option<String>, message: Option<String>) {
        let now = chrono::Utc::now().to_rfc3339();
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(cond) => {
                if cond.status != status {
                    cond.last_transition_time = Some(now);
                }
                cond.status = status;
                cond.reason = reason;
                cond.message = message;
            }
            None => self.conditions.push(Condition {
                type_: type_.into(),
                status,
                reason,
                message,
                last_transition_time: Some(now),
            }),
        }
    }
}
