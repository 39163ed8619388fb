use eventmesh_core::crd::{BrokerClass, ChannelImplementation};

use crate::manifests::transform::config_map_value;
use crate::manifests::Transformer;

/// The ConfigMap holding the cluster default channel.
const CHANNEL_DEFAULTS_CONFIG_MAP: &str = "default-ch-webhook";
const CHANNEL_DEFAULTS_KEY: &str = "default-ch-config";
/// The ConfigMap holding the cluster default broker class.
const BROKER_DEFAULTS_CONFIG_MAP: &str = "config-br-defaults";
const BROKER_DEFAULTS_KEY: &str = "default-br-config";

/// Set the cluster default channel implementation.
pub fn default_channel_implementation(namespace: &str, channel: ChannelImplementation) -> Transformer {
    let defaults = format!("clusterDefault:\n  apiVersion: messaging.knative.dev/v1\n  kind: {}\n", channel);
    config_map_value(namespace, CHANNEL_DEFAULTS_CONFIG_MAP, CHANNEL_DEFAULTS_KEY, defaults)
}

/// Set the cluster default broker class, registering the other class as an alternative.
pub fn default_broker_class(namespace: &str, class: BrokerClass, channel: ChannelImplementation) -> Transformer {
    let alternative = class.alternative();
    let defaults = format!(
        "clusterDefault:\n  brokerClass: {class}\n  apiVersion: v1\n  kind: ConfigMap\n  name: {config}\n  namespace: {ns}\n  brokerClasses:\n    {alt}:\n      apiVersion: v1\n      kind: ConfigMap\n      name: {alt_config}\n      namespace: {ns}\n",
        class = class,
        config = broker_class_config_map(class, channel),
        ns = namespace,
        alt = alternative,
        alt_config = broker_class_config_map(alternative, channel),
    );
    config_map_value(namespace, BROKER_DEFAULTS_CONFIG_MAP, BROKER_DEFAULTS_KEY, defaults)
}

/// The ConfigMap configuring brokers of the given class.
fn broker_class_config_map(class: BrokerClass, channel: ChannelImplementation) -> &'static str {
    match (class, channel) {
        (BrokerClass::MtChannelBased, ChannelImplementation::InMemoryChannel) => "config-br-default-channel",
        (BrokerClass::MtChannelBased, ChannelImplementation::KafkaChannel) => "kafka-channel",
        (BrokerClass::Kafka, _) => "kafka-broker-config",
    }
}
