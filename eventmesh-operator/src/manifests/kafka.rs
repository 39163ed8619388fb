//! The Kafka broker, channel, sink & source components.

use anyhow::{Context, Result};
use async_trait::async_trait;
use eventmesh_core::crd::EventMesh;

use crate::manifests::transform;
use crate::manifests::{inline, Definition, ManifestSet, ParseContext, Parser};

/// The manifest directory of the Kafka components.
pub const KAFKA_COMPONENT: &str = "eventing-kafka-broker-latest";

const CORE_FILES: &[&str] = &[
    "eventing-kafka-controller.yaml",
    "eventing-kafka-broker.yaml",
    "eventing-kafka-channel.yaml",
    "eventing-kafka-sink.yaml",
    "eventing-kafka-source.yaml",
];
const TLS_FILE: &str = "eventing-kafka-tls-networking.yaml";
const POST_INSTALL_FILE: &str = "eventing-kafka-post-install.yaml";

/// A parser of the Kafka components.
pub struct KafkaParser(ParseContext);

impl KafkaParser {
    /// Create a new instance.
    pub fn new(ctx: ParseContext) -> Self {
        Self(ctx)
    }

    async fn core(&self, em: &EventMesh) -> Result<ManifestSet> {
        let ctx = &self.0;
        let kafka = &em.spec.kafka;
        let mut set = ManifestSet::default();
        set.add_to_apply(ctx.source.load(KAFKA_COMPONENT, CORE_FILES).await?);
        set.add_to_apply(channel_template(&ctx.namespace, kafka.num_partitions, kafka.replication_factor));

        set.add_transformers(vec![
            transform::kafka_logging(&ctx.namespace, em.spec.log_level),
            transform::bootstrap_servers(&ctx.namespace, &kafka.bootstrap_servers),
            transform::number_of_partitions(&ctx.namespace, kafka.num_partitions),
            transform::replication_factor(&ctx.namespace, kafka.replication_factor),
            transform::kafka_topic_options(&ctx.namespace, &kafka.topic_config_options),
        ]);
        Ok(set)
    }
}

#[async_trait]
impl Parser for KafkaParser {
    fn name(&self) -> &'static str {
        "kafka"
    }

    #[tracing::instrument(level = "debug", skip(self, em))]
    async fn parse(&self, em: &EventMesh) -> Result<ManifestSet> {
        let ctx = &self.0;
        let mut set = ManifestSet::default();

        let core = self.core(em).await.context("error loading kafka core manifests")?;
        let core_defs = core.to_apply.clone();
        set.append(core);

        set.append(
            ctx.tls_manifests(em, KAFKA_COMPONENT, TLS_FILE)
                .await
                .context("error loading kafka tls manifests")?,
        );
        set.append(
            ctx.post_install_manifests(&core_defs, KAFKA_COMPONENT, POST_INSTALL_FILE)
                .await
                .context("error loading kafka post-install manifests")?,
        );
        Ok(set)
    }
}

/// The ConfigMap templating the spec of channels created by channel based brokers.
fn channel_template(namespace: &str, partitions: i32, replication_factor: i32) -> Vec<Definition> {
    inline(&format!(
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: kafka-channel
  namespace: {}
data:
  channel-template-spec: |
    apiVersion: messaging.knative.dev/v1
    kind: KafkaChannel
    spec:
      numPartitions: {}
      replicationFactor: {}
"#,
        namespace, partitions, replication_factor
    ))
}
