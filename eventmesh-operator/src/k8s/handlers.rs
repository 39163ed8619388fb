//! Watch handlers feeding the reconcile queue.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use eventmesh_core::crd::EventMesh;
use k8s_openapi::api::apps::v1::Deployment;
use kube::Resource;

use crate::reconciler::{KeyHandler, Reconciler, WorkQueue};
use crate::watchers::{Cache, EventHandler, ObjectKey};

/// Enqueues every changed EventMesh.
pub struct EnqueueEventMesh {
    queue: WorkQueue,
}

impl EnqueueEventMesh {
    /// Create a new instance.
    pub fn new(queue: WorkQueue) -> Self {
        Self { queue }
    }
}

impl EventHandler<EventMesh> for EnqueueEventMesh {
    fn on_add(&self, em: &EventMesh) {
        self.queue.enqueue(ObjectKey::of(em));
    }

    fn on_update(&self, _old: &EventMesh, new: &EventMesh) {
        self.queue.enqueue(ObjectKey::of(new));
    }

    fn on_delete(&self, em: &EventMesh) {
        self.queue.enqueue(ObjectKey::of(em));
    }
}

/// Enqueues the owning EventMesh of every changed Deployment.
pub struct EnqueueOwner {
    queue: WorkQueue,
}

impl EnqueueOwner {
    /// Create a new instance.
    pub fn new(queue: WorkQueue) -> Self {
        Self { queue }
    }

    fn enqueue_owners(&self, deployment: &Deployment) {
        let (api_version, kind) = (EventMesh::api_version(&()), EventMesh::kind(&()));
        let namespace = deployment.metadata.namespace.as_deref();
        deployment
            .metadata
            .owner_references
            .iter()
            .flatten()
            .filter(|owner| owner.kind == kind && owner.api_version == api_version)
            .for_each(|owner| self.queue.enqueue(ObjectKey::new(namespace, &owner.name)));
    }
}

impl EventHandler<Deployment> for EnqueueOwner {
    fn on_add(&self, deployment: &Deployment) {
        self.enqueue_owners(deployment);
    }

    fn on_update(&self, _old: &Deployment, new: &Deployment) {
        self.enqueue_owners(new);
    }

    fn on_delete(&self, deployment: &Deployment) {
        self.enqueue_owners(deployment);
    }
}

/// Enqueue every known EventMesh.
pub fn enqueue_all(eventmeshes: &Cache<EventMesh>, queue: &WorkQueue) {
    let all = eventmeshes.snapshot();
    tracing::debug!(count = all.len(), "resyncing all eventmeshes");
    for em in all {
        queue.enqueue(ObjectKey::of(em.as_ref()));
    }
}

/// Reconciles the EventMesh of each dequeued key.
pub struct ReconcileEventMesh {
    eventmeshes: Arc<Cache<EventMesh>>,
    reconciler: Reconciler,
}

impl ReconcileEventMesh {
    /// Create a new instance.
    pub fn new(eventmeshes: Arc<Cache<EventMesh>>, reconciler: Reconciler) -> Self {
        Self { eventmeshes, reconciler }
    }
}

#[async_trait]
impl KeyHandler for ReconcileEventMesh {
    #[tracing::instrument(level = "debug", skip(self, key), fields(%key))]
    async fn handle(&self, key: &ObjectKey) -> Result<()> {
        let em = match self.eventmeshes.get(key) {
            Some(em) => em,
            None => {
                tracing::debug!("eventmesh no longer exists, nothing to reconcile");
                return Ok(());
            }
        };
        self.reconciler.reconcile(&em).await
    }
}
