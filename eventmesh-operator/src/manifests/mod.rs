//! The manifest pipeline.
//!
//! Component parsers load static definitions into a `ManifestSet` along with the transformers
//! configuring them. A reconcile pass then transforms, sorts & installs the accumulated set.

mod definition;
mod eventing;
mod install;
mod kafka;
mod loader;
#[cfg(test)]
mod mod_test;
mod sort;
#[cfg(test)]
mod sort_test;
pub mod transform;
mod version;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use eventmesh_core::crd::EventMesh;

use crate::cluster::{DeploymentLister, SchemaProbe, CERT_MANAGER_SCHEMA};
use crate::config::AutoscalerTable;

pub use definition::Definition;
pub use eventing::EventingParser;
pub use install::install;
pub use kafka::KafkaParser;
pub use loader::{inline, parse_documents, ManifestSource};
pub use sort::{kind_rank, sort_for_apply, sort_for_delete};
pub use version::{detect_upgrade, versions, Version};

/// The signature of a definition mutation.
pub type MutationFn = dyn Fn(&mut Definition) -> Result<()> + Send + Sync;

/// A named mutation of definitions.
///
/// Transformers must be pure & convergent: they only touch the definition they are given, and
/// running one twice has the same effect as running it once.
#[derive(Clone)]
pub struct Transformer {
    name: String,
    func: Arc<MutationFn>,
}

impl Transformer {
    /// Create a new instance.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Definition) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply this transformer to the given definition.
    pub fn apply(&self, def: &mut Definition) -> Result<()> {
        (self.func)(def)
    }
}

impl std::fmt::Debug for Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer").field("name", &self.name).finish()
    }
}

/// The definitions to apply & delete in one reconcile pass, along with their transformers.
#[derive(Clone, Debug, Default)]
pub struct ManifestSet {
    pub to_apply: Vec<Definition>,
    pub to_delete: Vec<Definition>,
    transformers: Vec<Transformer>,
}

impl ManifestSet {
    pub fn add_to_apply(&mut self, defs: impl IntoIterator<Item = Definition>) {
        self.to_apply.extend(defs);
    }

    pub fn add_to_delete(&mut self, defs: impl IntoIterator<Item = Definition>) {
        self.to_delete.extend(defs);
    }

    pub fn add_transformer(&mut self, transformer: Transformer) {
        self.transformers.push(transformer);
    }

    pub fn add_transformers(&mut self, transformers: impl IntoIterator<Item = Transformer>) {
        self.transformers.extend(transformers);
    }

    pub fn transformers(&self) -> &[Transformer] {
        &self.transformers
    }

    /// Append all definitions & transformers of the given set.
    pub fn append(&mut self, other: ManifestSet) {
        self.to_apply.extend(other.to_apply);
        self.to_delete.extend(other.to_delete);
        self.transformers.extend(other.transformers);
    }

    /// Run every transformer against every definition of both the apply & delete sets.
    ///
    /// Definitions to delete are transformed too, as transformers may change metadata used to
    /// identify the objects to delete.
    pub fn transform(&mut self) -> Result<()> {
        let transformers = &self.transformers;
        for def in self.to_apply.iter_mut().chain(self.to_delete.iter_mut()) {
            for transformer in transformers {
                transformer
                    .apply(def)
                    .with_context(|| format!("error applying transformer {} to {}", transformer.name(), def.id()))?;
            }
        }
        Ok(())
    }

    /// Sort the apply set into apply order, and the delete set into delete order.
    pub fn sort(&mut self) {
        sort_for_apply(&mut self.to_apply);
        sort_for_delete(&mut self.to_delete);
    }

    /// Move all definitions matching the given predicate from the apply set to the delete set.
    ///
    /// Returns the number of moved definitions.
    pub fn move_to_delete<P>(&mut self, pred: P) -> usize
    where
        P: Fn(&Definition) -> bool,
    {
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.to_apply).into_iter().partition(|def| pred(def));
        self.to_apply = kept;
        let count = moved.len();
        self.to_delete.extend(moved);
        count
    }

    /// Check if the apply set holds a definition of the given kind, namespace & name.
    pub fn contains(&self, kind: &str, namespace: &str, name: &str) -> bool {
        self.to_apply.iter().any(|def| def.is(kind, namespace, name))
    }

    /// All Deployments of the apply set.
    pub fn deployments(&self) -> impl Iterator<Item = &Definition> {
        self.to_apply.iter().filter(|def| def.kind() == "Deployment")
    }
}

/// The collaborators needed by component parsers.
#[derive(Clone)]
pub struct ParseContext {
    /// The source of the static component manifests.
    pub source: ManifestSource,
    pub schemas: Arc<dyn SchemaProbe>,
    pub deployments: Arc<dyn DeploymentLister>,
    /// The namespace into which components are installed.
    pub namespace: String,
    pub autoscalers: AutoscalerTable,
}

/// A parser of the manifests of one or more components.
#[async_trait]
pub trait Parser: Send + Sync + 'static {
    /// A human readable name of the parsed components.
    fn name(&self) -> &'static str;

    /// Load the configured manifests of the given EventMesh.
    async fn parse(&self, em: &EventMesh) -> Result<ManifestSet>;
}

impl ParseContext {
    /// Load TLS manifests, which are applied if transport encryption is enabled and the
    /// certificate manager is installed, and deleted otherwise.
    async fn tls_manifests(&self, em: &EventMesh, component: &str, file: &str) -> Result<ManifestSet> {
        let defs = self.source.load(component, &[file]).await?;
        let cert_manager_installed = self
            .schemas
            .schema_exists(CERT_MANAGER_SCHEMA)
            .await
            .context("error checking if cert-manager is installed")?;

        let mut set = ManifestSet::default();
        if !em.spec.is_transport_encryption_disabled() && cert_manager_installed {
            set.add_to_apply(defs);
        } else {
            set.add_to_delete(defs);
        }
        Ok(set)
    }

    /// Load post-install manifests, only when applying the given core definitions is an upgrade.
    async fn post_install_manifests(&self, core: &[Definition], component: &str, file: &str) -> Result<ManifestSet> {
        let mut set = ManifestSet::default();
        let upgrade = detect_upgrade(core, self.deployments.as_ref(), &self.namespace).context("error checking if this is an upgrade")?;
        if upgrade {
            tracing::debug!(component, "adding post-install manifests, at least the minor version is upgraded");
            set.add_to_apply(self.source.load(component, &[file]).await?);
        } else {
            tracing::debug!(component, "skipping post-install manifests, no minor version upgrade ongoing");
        }
        Ok(set)
    }
}
