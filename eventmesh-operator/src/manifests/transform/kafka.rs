use std::collections::BTreeMap;

use crate::manifests::transform::{config_map_value, config_map_values, is_config_map, set_data};
use crate::manifests::{Definition, Transformer};

/// The Kafka broker's config, which holds the topic defaults.
pub const KAFKA_BROKER_CONFIG: &str = "kafka-broker-config";
/// The Kafka channel's config.
pub const KAFKA_CHANNEL_CONFIG: &str = "kafka-channel-config";

/// Set the bootstrap servers of the Kafka broker & channel configs.
pub fn bootstrap_servers(namespace: &str, servers: &[String]) -> Transformer {
    let (namespace, servers) = (namespace.to_string(), servers.join(","));
    Transformer::new("kafka bootstrap servers", move |def: &mut Definition| {
        if !is_config_map(def, &namespace, KAFKA_BROKER_CONFIG) && !is_config_map(def, &namespace, KAFKA_CHANNEL_CONFIG) {
            return Ok(());
        }
        set_data(def, "bootstrap.servers", servers.as_str())
    })
}

/// Set the default partition count of created topics.
pub fn number_of_partitions(namespace: &str, partitions: i32) -> Transformer {
    config_map_value(namespace, KAFKA_BROKER_CONFIG, "default.topic.partitions", partitions.to_string())
}

/// Set the default replication factor of created topics.
pub fn replication_factor(namespace: &str, factor: i32) -> Transformer {
    config_map_value(namespace, KAFKA_BROKER_CONFIG, "default.topic.replication.factor", factor.to_string())
}

/// Set additional default topic config options, e.g. `retention.ms`.
pub fn kafka_topic_options(namespace: &str, options: &BTreeMap<String, String>) -> Transformer {
    let prefixed = options
        .iter()
        .map(|(key, val)| (format!("default.topic.config.{}", key), val.clone()))
        .collect();
    config_map_values(namespace, KAFKA_BROKER_CONFIG, prefixed)
}
