//! The eventing core, in-memory channel & multi-tenant broker components.

use anyhow::{Context, Result};
use async_trait::async_trait;
use eventmesh_core::crd::EventMesh;

use crate::manifests::transform;
use crate::manifests::{ManifestSet, ParseContext, Parser};

/// The manifest directory of the eventing components.
pub const EVENTING_COMPONENT: &str = "eventing-latest";

const CORE_FILES: &[&str] = &["eventing-crds.yaml", "eventing-core.yaml"];
const IMC_FILE: &str = "in-memory-channel.yaml";
const MT_BROKER_FILE: &str = "mt-channel-broker.yaml";
const TLS_FILE: &str = "eventing-tls-networking.yaml";
const POST_INSTALL_FILE: &str = "eventing-post-install.yaml";

/// The name of the ConfigMap holding the eventing feature flags.
const FEATURES_CONFIG_MAP: &str = "config-features";

/// A parser of the eventing components.
///
/// The in-memory channel & multi-tenant broker are always installed, and scaled down when none
/// of their objects exist.
pub struct EventingParser(ParseContext);

impl EventingParser {
    /// Create a new instance.
    pub fn new(ctx: ParseContext) -> Self {
        Self(ctx)
    }

    async fn core(&self, em: &EventMesh) -> Result<ManifestSet> {
        let ctx = &self.0;
        let mut set = ManifestSet::default();
        set.add_to_apply(ctx.source.load(EVENTING_COMPONENT, CORE_FILES).await?);

        let spec = &em.spec;
        set.add_transformers(vec![
            transform::eventing_core_logging(&ctx.namespace, spec.log_level),
            transform::default_channel_implementation(&ctx.namespace, spec.default_channel()),
            transform::default_broker_class(&ctx.namespace, spec.default_broker(), spec.default_channel()),
            transform::config_map_values(&ctx.namespace, FEATURES_CONFIG_MAP, spec.features.clone()),
            transform::config_map_override(spec.overrides.config.clone()),
            transform::workloads_override(&ctx.namespace, spec.overrides.workloads.clone(), ctx.autoscalers.clone()),
        ]);
        Ok(set)
    }
}

#[async_trait]
impl Parser for EventingParser {
    fn name(&self) -> &'static str {
        "eventing"
    }

    #[tracing::instrument(level = "debug", skip(self, em))]
    async fn parse(&self, em: &EventMesh) -> Result<ManifestSet> {
        let ctx = &self.0;
        let mut set = ManifestSet::default();

        let core = self.core(em).await.context("error loading eventing core manifests")?;
        let core_defs = core.to_apply.clone();
        set.append(core);

        set.add_to_apply(
            ctx.source
                .load(EVENTING_COMPONENT, &[IMC_FILE])
                .await
                .context("error loading in-memory channel manifests")?,
        );
        set.add_to_apply(
            ctx.source
                .load(EVENTING_COMPONENT, &[MT_BROKER_FILE])
                .await
                .context("error loading multi-tenant broker manifests")?,
        );
        set.append(
            ctx.tls_manifests(em, EVENTING_COMPONENT, TLS_FILE)
                .await
                .context("error loading eventing tls manifests")?,
        );
        set.append(
            ctx.post_install_manifests(&core_defs, EVENTING_COMPONENT, POST_INSTALL_FILE)
                .await
                .context("error loading eventing post-install manifests")?,
        );
        Ok(set)
    }
}
