//! The staged reconciliation engine.
//!
//! A reconcile pass runs an ordered list of named stages against a fresh `PassContext`. Each
//! stage either continues the pass, soft-stops it, or fails it. The `Reconciler` translates the
//! outcome of a pass into status conditions of the reconciled EventMesh.

mod queue;
mod stages;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use eventmesh_core::crd::EventMesh;

use crate::cluster::StatusWriter;
use crate::error::{as_not_ready, is_non_recoverable};
use crate::manifests::ManifestSet;

pub use queue::{KeyHandler, WorkQueue};
pub use stages::{install_stages, ApplyScaling, AttachOwner, Install, LoadManifests, Preconditions, Sort, Transform, Verify};

/// The mutable state of a single reconcile pass.
pub struct PassContext<'a> {
    /// The EventMesh being reconciled.
    pub em: &'a EventMesh,
    /// The manifests accumulated by the stages of this pass.
    pub manifests: ManifestSet,
}

/// The reason a pass was stopped without error.
#[derive(Clone, Debug, PartialEq)]
pub enum StopReason {
    /// A precondition of the installation does not hold, and requires action by the user.
    Precondition { reason: &'static str, message: String },
    /// Installed components are not ready yet.
    NotReady(String),
}

/// The outcome of a single stage.
#[derive(Debug)]
pub enum StageOutcome {
    /// Continue with the next stage.
    Continue,
    /// Stop the pass without error.
    SoftStop(StopReason),
    /// Fail the pass.
    Fail(anyhow::Error),
}

impl From<Result<()>> for StageOutcome {
    fn from(res: Result<()>) -> Self {
        match res {
            Ok(()) => Self::Continue,
            Err(err) => Self::Fail(err),
        }
    }
}

/// A named step of a reconcile pass.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut PassContext<'_>) -> StageOutcome;
}

/// The outcome of a reconcile pass.
#[derive(Debug)]
pub enum PassOutcome {
    /// Every stage ran to completion.
    Completed,
    /// A stage stopped the pass without error.
    Stopped(StopReason),
    /// A stage failed the pass.
    Failed(anyhow::Error),
}

/// A finished reconcile pass.
#[derive(Debug)]
pub struct Pass {
    pub outcome: PassOutcome,
    /// The manifests as left by the last executed stage.
    pub manifests: ManifestSet,
}

/// An ordered list of stages.
pub struct Stages(Vec<Box<dyn Stage>>);

impl Stages {
    /// Create a new instance.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self(stages)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(|stage| stage.name()).collect()
    }

    /// Execute every stage in order against the given EventMesh, until one does not continue.
    ///
    /// A failure carrying a not-ready marker anywhere in its chain is turned into a soft-stop.
    pub async fn execute(&self, em: &EventMesh) -> Pass {
        let mut ctx = PassContext {
            em,
            manifests: ManifestSet::default(),
        };
        let mut outcome = PassOutcome::Completed;
        for stage in self.0.iter() {
            tracing::debug!(stage = stage.name(), "executing stage");
            match stage.run(&mut ctx).await {
                StageOutcome::Continue => continue,
                StageOutcome::SoftStop(reason) => {
                    tracing::debug!(stage = stage.name(), ?reason, "stage stopped reconcile pass");
                    outcome = PassOutcome::Stopped(reason);
                }
                StageOutcome::Fail(err) => {
                    outcome = match as_not_ready(&err) {
                        Some(not_ready) => PassOutcome::Stopped(StopReason::NotReady(not_ready.0.clone())),
                        None => PassOutcome::Failed(err.context(format!("error in stage {}", stage.name()))),
                    };
                }
            }
            break;
        }
        Pass {
            outcome,
            manifests: ctx.manifests,
        }
    }
}

/// Reconciles EventMesh objects, reporting the outcome of every pass through its status.
pub struct Reconciler {
    stages: Stages,
    status: Arc<dyn StatusWriter>,
}

impl Reconciler {
    /// Create a new instance.
    pub fn new(stages: Stages, status: Arc<dyn StatusWriter>) -> Self {
        Self { stages, status }
    }

    /// Reconcile the given EventMesh.
    ///
    /// Returns an error only if the pass should be retried. Precondition failures & non-recoverable
    /// errors are reported through the status alone.
    #[tracing::instrument(level = "debug", skip(self, em), fields(name = ?em.metadata.name, generation = ?em.metadata.generation))]
    pub async fn reconcile(&self, em: &EventMesh) -> Result<()> {
        let mut status = em.status.clone().unwrap_or_default();
        status.initialize_conditions();
        status.observed_generation = em.metadata.generation;

        let pass = self.stages.execute(em).await;
        let res = match pass.outcome {
            PassOutcome::Completed => {
                tracing::info!("eventmesh installed");
                status.mark_install_succeeded();
                status.mark_deployments_available();
                Ok(())
            }
            PassOutcome::Stopped(StopReason::Precondition { reason, message }) => {
                tracing::warn!(reason, %message, "eventmesh precondition not met");
                status.mark_install_failed(reason, message);
                Ok(())
            }
            PassOutcome::Stopped(StopReason::NotReady(message)) => {
                tracing::debug!(%message, "eventmesh installed, waiting for deployments");
                status.mark_install_succeeded();
                status.mark_deployments_not_ready("DeploymentsNotReady", message);
                Ok(())
            }
            PassOutcome::Failed(err) if is_non_recoverable(&err) => {
                tracing::error!(error = ?err, "non-recoverable error reconciling eventmesh");
                status.mark_install_failed("NonRecoverable", format!("{:#}", err));
                Ok(())
            }
            PassOutcome::Failed(err) => {
                status.mark_install_failed("ReconcileFailed", format!("{:#}", err));
                Err(err)
            }
        };

        self.status.write_status(em, &status).await.context("error writing eventmesh status")?;
        res
    }
}
