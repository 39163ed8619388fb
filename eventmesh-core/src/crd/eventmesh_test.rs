use anyhow::Result;

use super::*;

#[test]
fn spec_deserializes_with_defaults() -> Result<()> {
    let spec: EventMeshSpec = serde_json::from_str("{}")?;

    assert!(spec.log_level == LogLevel::Info, "expected default log level info, got {}", spec.log_level);
    assert!(spec.kafka.num_partitions == 3, "expected default partitions 3, got {}", spec.kafka.num_partitions);
    assert!(
        spec.kafka.replication_factor == 1,
        "expected default replication factor 1, got {}",
        spec.kafka.replication_factor
    );
    assert!(spec.default_broker() == BrokerClass::Kafka, "expected Kafka default broker, got {}", spec.default_broker());
    assert!(
        spec.default_channel() == ChannelImplementation::KafkaChannel,
        "expected KafkaChannel default channel, got {}",
        spec.default_channel()
    );
    assert!(spec.is_transport_encryption_disabled(), "expected transport encryption to be disabled by default");

    Ok(())
}

#[test]
fn spec_deserializes_from_full_yaml() -> Result<()> {
    let spec: EventMeshSpec = serde_yaml::from_str(
        r#"
kafka:
  bootstrapServers: ["my-cluster-kafka-bootstrap.kafka:9092"]
  numPartitions: 10
  topicConfigOptions:
    retention.ms: "1000"
logLevel: debug
defaultBroker: MTChannelBasedBroker
defaultChannel: InMemoryChannel
features:
  transport-encryption: strict
overrides:
  config:
    logging:
      loglevel.controller: error
  workloads:
    - name: imc-dispatcher
      replicas: 3
      tolerations:
        - key: node-role
          operator: Exists
"#,
    )?;

    assert!(spec.log_level == LogLevel::Debug, "expected debug log level, got {}", spec.log_level);
    assert!(spec.kafka.num_partitions == 10, "expected 10 partitions, got {}", spec.kafka.num_partitions);
    assert!(spec.kafka.replication_factor == 1, "expected defaulted replication factor, got {}", spec.kafka.replication_factor);
    assert!(spec.default_broker() == BrokerClass::MtChannelBased, "unexpected default broker {}", spec.default_broker());
    assert!(
        spec.default_channel() == ChannelImplementation::InMemoryChannel,
        "unexpected default channel {}",
        spec.default_channel()
    );
    assert!(!spec.is_transport_encryption_disabled(), "expected transport encryption to be enabled");
    assert!(
        spec.replicas_override("imc-dispatcher") == Some(3),
        "expected replicas override of 3, got {:?}",
        spec.replicas_override("imc-dispatcher")
    );
    assert!(spec.replicas_override("imc-controller").is_none(), "expected no replicas override for imc-controller");
    let tolerations = &spec.overrides.workloads[0].tolerations;
    assert!(tolerations.len() == 1, "expected 1 toleration, got {}", tolerations.len());

    Ok(())
}

#[test]
fn log_level_conversions() {
    assert!(LogLevel::Trace.zap_level() == "debug", "trace should map to zap debug");
    assert!(LogLevel::Warn.zap_level() == "warn", "warn should map to zap warn");
    assert!(LogLevel::Trace.logback_level() == "TRACE", "trace should map to logback TRACE");
    assert!(LogLevel::Fatal.logback_level() == "FATAL", "fatal should map to logback FATAL");
}

#[test]
fn status_ready_is_derived_from_dependent_conditions() {
    let mut status = EventMeshStatus::default();
    status.initialize_conditions();
    assert!(status.conditions.len() == 3, "expected 3 initialized conditions, got {}", status.conditions.len());
    assert!(!status.is_ready(), "expected status to not be ready after initialization");
    let ready = status.get_condition(CONDITION_READY).map(|c| c.status);
    assert!(ready == Some(ConditionStatus::Unknown), "expected Ready to be Unknown, got {:?}", ready);

    status.mark_install_succeeded();
    assert!(!status.is_ready(), "expected status to not be ready with deployments unknown");

    status.mark_deployments_available();
    assert!(status.is_ready(), "expected status to be ready");

    status.mark_deployments_not_ready("DeploymentsNotReady", "imc-dispatcher");
    let ready = status.get_condition(CONDITION_READY).cloned();
    assert!(
        matches!(&ready, Some(c) if c.status == ConditionStatus::False && c.reason.as_deref() == Some("DeploymentsNotReady")),
        "expected Ready to be False with the dependent reason, got {:?}",
        ready
    );
}

#[test]
fn status_transition_time_only_changes_with_status() {
    let mut status = EventMeshStatus::default();
    status.mark_install_failed("Foreign", "first");
    let first = status.get_condition(CONDITION_INSTALLED).and_then(|c| c.last_transition_time.clone());

    status.mark_install_failed("Foreign", "second");
    let cond = status.get_condition(CONDITION_INSTALLED).cloned();
    assert!(
        matches!(&cond, Some(c) if c.last_transition_time == first && c.message.as_deref() == Some("second")),
        "expected unchanged transition time with updated message, got {:?}",
        cond
    );
}

#[test]
fn broker_class_is_read_from_annotation() {
    let mut broker = Broker::new("default", BrokerSpec::default());
    assert!(broker.class().is_none(), "expected no class on an unannotated broker");

    broker.metadata.annotations = Some([(BROKER_CLASS_ANNOTATION.to_string(), "MTChannelBasedBroker".to_string())].into_iter().collect());
    assert!(broker.class() == Some("MTChannelBasedBroker"), "unexpected broker class {:?}", broker.class());
}
