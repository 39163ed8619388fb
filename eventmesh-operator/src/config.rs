//! Runtime configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,

    /// The Kubernetes namespace into which the event mesh components are installed.
    #[serde(default = "Config::namespace_default")]
    pub namespace: String,
    /// The root directory holding the manifests of each component.
    #[serde(default = "Config::manifests_path_default")]
    pub manifests_path: String,

    /// The maximum number of concurrently running reconcile passes.
    #[serde(default = "Config::reconcile_workers_default")]
    pub reconcile_workers: usize,
    /// The interval at which gated watches poll for their schema.
    #[serde(default = "Config::schema_poll_interval_ms_default")]
    pub schema_poll_interval_ms: u64,
    /// An optional bound on how long gated watches poll for their schema.
    #[serde(default)]
    pub schema_poll_timeout_seconds: Option<u64>,

    /// Workloads governed by an autoscaler, as a comma separated list.
    #[serde(default = "Config::autoscaled_workloads_default", deserialize_with = "Config::parse_workload_list")]
    pub autoscaled_workloads: BTreeSet<String>,
    /// Autoscaler names which differ from their workload's name, as comma separated `workload=autoscaler` pairs.
    #[serde(default = "Config::hpa_name_overrides_default", deserialize_with = "Config::parse_name_overrides")]
    pub hpa_name_overrides: BTreeMap<String, String>,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    /// The interval at which gated watches poll for their schema.
    pub fn schema_poll_interval(&self) -> Duration {
        Duration::from_millis(self.schema_poll_interval_ms)
    }

    /// The optional bound on schema polling.
    pub fn schema_poll_timeout(&self) -> Option<Duration> {
        self.schema_poll_timeout_seconds.map(Duration::from_secs)
    }

    /// Build the autoscaler lookup table from this config.
    pub fn autoscalers(&self) -> AutoscalerTable {
        AutoscalerTable {
            workloads: self.autoscaled_workloads.clone(),
            hpa_names: self.hpa_name_overrides.clone(),
        }
    }

    fn namespace_default() -> String {
        "knative-eventing".into()
    }

    fn manifests_path_default() -> String {
        "/var/run/ko".into()
    }

    fn reconcile_workers_default() -> usize {
        2
    }

    fn schema_poll_interval_ms_default() -> u64 {
        1000
    }

    fn autoscaled_workloads_default() -> BTreeSet<String> {
        AutoscalerTable::default().workloads
    }

    fn hpa_name_overrides_default() -> BTreeMap<String, String> {
        AutoscalerTable::default().hpa_names
    }

    /// Parse a comma separated list of workload names.
    fn parse_workload_list<'de, D: Deserializer<'de>>(val: D) -> Result<BTreeSet<String>, D::Error> {
        let raw: String = Deserialize::deserialize(val).map_err(|err| DeError::custom(format!("error parsing AUTOSCALED_WORKLOADS: {}", err)))?;
        Ok(raw.split(',').map(str::trim).filter(|name| !name.is_empty()).map(String::from).collect())
    }

    /// Parse a comma separated list of `workload=autoscaler` pairs.
    fn parse_name_overrides<'de, D: Deserializer<'de>>(val: D) -> Result<BTreeMap<String, String>, D::Error> {
        let raw: String = Deserialize::deserialize(val).map_err(|err| DeError::custom(format!("error parsing HPA_NAME_OVERRIDES: {}", err)))?;
        raw.split(',')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((workload, hpa)) if !workload.trim().is_empty() && !hpa.trim().is_empty() => Ok((workload.trim().to_string(), hpa.trim().to_string())),
                _ => Err(DeError::custom(format!("invalid HPA_NAME_OVERRIDES entry {:?}, expected workload=autoscaler", pair))),
            })
            .collect()
    }
}

/// Lookup table of workloads governed by an autoscaler.
#[derive(Clone, Debug, PartialEq)]
pub struct AutoscalerTable {
    workloads: BTreeSet<String>,
    hpa_names: BTreeMap<String, String>,
}

impl AutoscalerTable {
    /// Check if the given workload's replicas are governed by an autoscaler.
    pub fn is_autoscaled(&self, workload: &str) -> bool {
        self.workloads.contains(workload)
    }

    /// The name of the autoscaler of the given workload.
    ///
    /// Autoscalers are named after their workload unless overridden.
    pub fn hpa_name<'a>(&'a self, workload: &'a str) -> &'a str {
        self.hpa_names.get(workload).map(String::as_str).unwrap_or(workload)
    }
}

impl Default for AutoscalerTable {
    fn default() -> Self {
        let workloads = [
            "eventing-webhook",
            "mt-broker-ingress",
            "mt-broker-filter",
            "kafka-broker-dispatcher",
            "kafka-source-dispatcher",
            "kafka-channel-dispatcher",
        ];
        Self {
            workloads: workloads.iter().map(|w| w.to_string()).collect(),
            hpa_names: maplit::btreemap! {
                "mt-broker-ingress".to_string() => "broker-ingress-hpa".to_string(),
                "mt-broker-filter".to_string() => "broker-filter-hpa".to_string(),
            },
        }
    }
}
