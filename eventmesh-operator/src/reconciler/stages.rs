//! The stages of an install pass.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use eventmesh_core::crd::EventMesh;
use k8s_openapi::api::apps::v1::Deployment;
use kube::Resource;

use crate::cluster::{DeploymentLister, ManifestClient, SchemaProbe, CERT_MANAGER_SCHEMA};
use crate::config::AutoscalerTable;
use crate::error::NotReadyError;
use crate::manifests::{install, transform, EventingParser, KafkaParser, ParseContext, Parser};
use crate::reconciler::{PassContext, Stage, StageOutcome, Stages, StopReason};
use crate::scaler::{ScaleTargets, SCALED_WORKLOADS};

/// The deployment used to detect an eventing installation which is not owned by an EventMesh.
const OWNERSHIP_PROBE_DEPLOYMENT: &str = "eventing-controller";

/// Build the stages of a full install pass.
pub fn install_stages(parse: ParseContext, targets: Arc<dyn ScaleTargets>, client: Arc<dyn ManifestClient>) -> Stages {
    Stages::new(vec![
        Box::new(Preconditions {
            deployments: parse.deployments.clone(),
            schemas: parse.schemas.clone(),
            namespace: parse.namespace.clone(),
        }),
        Box::new(LoadManifests {
            parsers: vec![Box::new(EventingParser::new(parse.clone())), Box::new(KafkaParser::new(parse.clone()))],
        }),
        Box::new(ApplyScaling {
            targets,
            autoscalers: parse.autoscalers.clone(),
            namespace: parse.namespace.clone(),
        }),
        Box::new(AttachOwner),
        Box::new(Transform),
        Box::new(Sort),
        Box::new(Install { client }),
        Box::new(Verify {
            deployments: parse.deployments,
            namespace: parse.namespace,
        }),
    ])
}

/// Checks that the installation may proceed at all.
pub struct Preconditions {
    pub deployments: Arc<dyn DeploymentLister>,
    pub schemas: Arc<dyn SchemaProbe>,
    pub namespace: String,
}

#[async_trait]
impl Stage for Preconditions {
    fn name(&self) -> &'static str {
        "preconditions"
    }

    async fn run(&self, ctx: &mut PassContext<'_>) -> StageOutcome {
        let live = match self.deployments.get(&self.namespace, OWNERSHIP_PROBE_DEPLOYMENT) {
            Ok(live) => live,
            Err(err) => return StageOutcome::Fail(err.context("error checking for an existing eventing installation")),
        };
        if let Some(live) = live {
            if !is_owned_by(&live, ctx.em) {
                return StageOutcome::SoftStop(StopReason::Precondition {
                    reason: "ForeignInstallation",
                    message: format!(
                        "deployment {}/{} exists but is not owned by this EventMesh",
                        self.namespace, OWNERSHIP_PROBE_DEPLOYMENT
                    ),
                });
            }
        }

        if !ctx.em.spec.is_transport_encryption_disabled() {
            match self.schemas.schema_exists(CERT_MANAGER_SCHEMA).await {
                Ok(true) => (),
                Ok(false) => {
                    return StageOutcome::SoftStop(StopReason::Precondition {
                        reason: "CertManagerNotInstalled",
                        message: "transport encryption requires cert-manager to be installed".into(),
                    })
                }
                Err(err) => return StageOutcome::Fail(err.context("error checking if cert-manager is installed")),
            }
        }
        StageOutcome::Continue
    }
}

/// Check if any owner reference of the given deployment points at the given EventMesh.
fn is_owned_by(deployment: &Deployment, em: &EventMesh) -> bool {
    let kind = EventMesh::kind(&());
    let name = em.meta().name.as_deref().unwrap_or_default();
    deployment
        .metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| match em.meta().uid.as_deref() {
            Some(uid) => owner.uid == uid,
            None => owner.kind == kind && owner.name == name,
        })
}

/// Loads the manifests of every component, in parser order.
pub struct LoadManifests {
    pub parsers: Vec<Box<dyn Parser>>,
}

#[async_trait]
impl Stage for LoadManifests {
    fn name(&self) -> &'static str {
        "load manifests"
    }

    async fn run(&self, ctx: &mut PassContext<'_>) -> StageOutcome {
        for parser in self.parsers.iter() {
            match parser.parse(ctx.em).await {
                Ok(set) => ctx.manifests.append(set),
                Err(err) => return StageOutcome::Fail(err.context(format!("error loading {} manifests", parser.name()))),
            }
        }
        StageOutcome::Continue
    }
}

/// Registers the replica mutations derived from the scale targets.
pub struct ApplyScaling {
    pub targets: Arc<dyn ScaleTargets>,
    pub autoscalers: AutoscalerTable,
    pub namespace: String,
}

impl ApplyScaling {
    fn apply(&self, ctx: &mut PassContext<'_>) -> Result<()> {
        for (workload, family) in SCALED_WORKLOADS.iter() {
            if let Some(replicas) = ctx.em.spec.replicas_override(workload) {
                tracing::debug!(workload, replicas, "replicas set by workload override, skipping scaling");
                continue;
            }
            if !ctx.manifests.contains("Deployment", &self.namespace, workload) {
                continue;
            }

            let target = self.targets.scale_target(*family);
            if !self.autoscalers.is_autoscaled(workload) {
                ctx.manifests
                    .add_transformer(transform::scale("apps/v1", "Deployment", &self.namespace, workload, target)?);
                continue;
            }

            let hpa = self.autoscalers.hpa_name(workload);
            if target == 0 {
                // Autoscalers can not scale to zero, so the workload is scaled directly.
                let moved = ctx.manifests.move_to_delete(|def| def.is("HorizontalPodAutoscaler", &self.namespace, hpa));
                tracing::debug!(workload, hpa, moved, "scaling autoscaled workload to zero");
                ctx.manifests
                    .add_transformer(transform::scale("apps/v1", "Deployment", &self.namespace, workload, 0)?);
            } else {
                ctx.manifests.add_transformer(transform::hpa_replicas(&self.namespace, hpa, target));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for ApplyScaling {
    fn name(&self) -> &'static str {
        "apply scaling"
    }

    async fn run(&self, ctx: &mut PassContext<'_>) -> StageOutcome {
        self.apply(ctx).context("error applying scale targets").into()
    }
}

/// Makes the reconciled EventMesh the owner of every installed object.
pub struct AttachOwner;

#[async_trait]
impl Stage for AttachOwner {
    fn name(&self) -> &'static str {
        "attach owner"
    }

    async fn run(&self, ctx: &mut PassContext<'_>) -> StageOutcome {
        ctx.manifests.add_transformer(transform::inject_owner(ctx.em.owner_reference()));
        StageOutcome::Continue
    }
}

pub struct Transform;

#[async_trait]
impl Stage for Transform {
    fn name(&self) -> &'static str {
        "transform"
    }

    async fn run(&self, ctx: &mut PassContext<'_>) -> StageOutcome {
        tracing::debug!(transformers = ctx.manifests.transformers().len(), "transforming manifests");
        ctx.manifests.transform().context("error transforming manifests").into()
    }
}

pub struct Sort;

#[async_trait]
impl Stage for Sort {
    fn name(&self) -> &'static str {
        "sort"
    }

    async fn run(&self, ctx: &mut PassContext<'_>) -> StageOutcome {
        ctx.manifests.sort();
        StageOutcome::Continue
    }
}

pub struct Install {
    pub client: Arc<dyn ManifestClient>,
}

#[async_trait]
impl Stage for Install {
    fn name(&self) -> &'static str {
        "install"
    }

    async fn run(&self, ctx: &mut PassContext<'_>) -> StageOutcome {
        install(&ctx.manifests, self.client.as_ref()).await.context("error installing manifests").into()
    }
}

/// Checks that every installed Deployment is available.
pub struct Verify {
    pub deployments: Arc<dyn DeploymentLister>,
    pub namespace: String,
}

#[async_trait]
impl Stage for Verify {
    fn name(&self) -> &'static str {
        "verify"
    }

    async fn run(&self, ctx: &mut PassContext<'_>) -> StageOutcome {
        let mut not_ready = vec![];
        for def in ctx.manifests.deployments() {
            let namespace = def.namespace().unwrap_or(self.namespace.as_str());
            let live = match self.deployments.get(namespace, def.name()) {
                Ok(Some(live)) => live,
                Ok(None) => return StageOutcome::SoftStop(StopReason::NotReady(format!("deployment {}/{} not found", namespace, def.name()))),
                Err(err) => return StageOutcome::Fail(err.context(format!("error getting deployment {}/{}", namespace, def.name()))),
            };
            if !is_available(&live) {
                not_ready.push(def.name().to_string());
            }
        }
        if not_ready.is_empty() {
            return StageOutcome::Continue;
        }
        StageOutcome::Fail(NotReadyError(format!("deployments not ready: {}", not_ready.join(", "))).into())
    }
}

/// Check if the given deployment reports the `Available` condition.
fn is_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conds| conds.iter().any(|cond| cond.type_ == "Available" && cond.status == "True"))
        .unwrap_or(false)
}
