//! Field-level mutations of component definitions.
//!
//! Every function here builds a `Transformer` which leaves definitions it does not target
//! untouched.

mod configmap;
mod defaults;
mod kafka;
mod logging;
mod owner;
mod scale;
mod workload;

use anyhow::Result;

use crate::manifests::Definition;

pub use configmap::{config_map_override, config_map_value, config_map_values};
pub use defaults::{default_broker_class, default_channel_implementation};
pub use kafka::{bootstrap_servers, kafka_topic_options, number_of_partitions, replication_factor};
pub use logging::{eventing_core_logging, kafka_logging};
pub use owner::inject_owner;
pub use scale::{hpa_replicas, scale};
pub use workload::workloads_override;

/// Check if the given definition is the ConfigMap of the given namespace & name.
fn is_config_map(def: &Definition, namespace: &str, name: &str) -> bool {
    def.is("ConfigMap", namespace, name)
}

/// Set a data key of a ConfigMap definition.
fn set_data(def: &mut Definition, key: &str, value: impl Into<String>) -> Result<()> {
    def.set(&["data", key], serde_json::Value::String(value.into()))
}
