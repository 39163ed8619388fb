//! Kubernetes controller.
//!
//! This controller observes EventMesh objects, the Deployments installed for them & the CRDs of
//! the cluster, and drives every EventMesh through the staged install pass. The scaler's gated
//! watches are started & stopped as their CRDs appear & disappear, and wake a resync of every
//! EventMesh whenever a scale target may have changed.

mod client;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use eventmesh_core::crd::{Broker, EventMesh, InMemoryChannel};
use futures::prelude::*;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::Api;
use kube::client::Client;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::Config;
use crate::manifests::{ManifestSource, ParseContext};
use crate::reconciler::{install_stages, Reconciler, WorkQueue};
use crate::scaler::{Scaler, ScalerSchemaHandler};
use crate::watchers::{wait_for_sync, Cache, GatedWatchOptions, Informer};

pub use client::{ApiSchemaProbe, KubeManifestClient, KubeStatusWriter, KubeWatchSource};
pub use handlers::{enqueue_all, EnqueueEventMesh, EnqueueOwner, ReconcileEventMesh};

/// The delay before a failed reconcile pass is retried.
const REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// Kubernetes controller for installing EventMesh objects.
pub struct Controller {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// All known EventMesh objects.
    eventmeshes: Arc<Cache<EventMesh>>,
    /// All known Deployments of the system namespace.
    deployments: Arc<Cache<Deployment>>,
    /// All known CRDs of the cluster.
    crds: Arc<Cache<CustomResourceDefinition>>,
}

impl Controller {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        Ok(Self {
            client,
            config,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            shutdown_tx,
            eventmeshes: Default::default(),
            deployments: Default::default(),
            crds: Default::default(),
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        // Wakes of the scaler are coalesced into resyncs of every EventMesh.
        let (resync_tx, mut resync_rx) = mpsc::unbounded_channel::<()>();
        let opts = GatedWatchOptions {
            poll_interval: self.config.schema_poll_interval(),
            poll_timeout: self.config.schema_poll_timeout(),
        };
        let scaler = Arc::new(Scaler::new(
            Arc::new(ApiSchemaProbe::new(self.client.clone())),
            Arc::new(KubeWatchSource::new(Api::<InMemoryChannel>::all(self.client.clone()))),
            Arc::new(KubeWatchSource::new(Api::<Broker>::all(self.client.clone()))),
            opts,
            self.shutdown_tx.clone(),
            Arc::new(move || {
                let _ = resync_tx.send(());
            }),
        ));

        let parse = ParseContext {
            source: ManifestSource::new(&self.config.manifests_path),
            schemas: self.crds.clone(),
            deployments: self.deployments.clone(),
            namespace: self.config.namespace.clone(),
            autoscalers: self.config.autoscalers(),
        };
        let stages = install_stages(parse, scaler.clone(), Arc::new(KubeManifestClient::new(self.client.clone())));
        tracing::debug!(stages = ?stages.names(), "install pass built");
        let reconciler = Reconciler::new(stages, Arc::new(KubeStatusWriter::new(self.client.clone())));
        let (queue, queue_handle) = WorkQueue::spawn(
            Arc::new(ReconcileEventMesh::new(self.eventmeshes.clone(), reconciler)),
            self.config.reconcile_workers,
            REQUEUE_DELAY,
            self.shutdown_tx.clone(),
        );

        // Fill the Deployment & CRD caches before any EventMesh is observed.
        let (deployments_handle, deployments_synced) = Informer::new(
            Arc::new(KubeWatchSource::new(Api::<Deployment>::namespaced(self.client.clone(), &self.config.namespace))),
            self.deployments.clone(),
        )
        .with_handler(Arc::new(EnqueueOwner::new(queue.clone())))
        .spawn(self.stop_signal());
        let (crds_handle, crds_synced) = Informer::new(Arc::new(KubeWatchSource::new(Api::<CustomResourceDefinition>::all(self.client.clone()))), self.crds.clone())
            .with_handler(Arc::new(ScalerSchemaHandler::new(scaler.clone())))
            .spawn(self.stop_signal());
        let synced = async {
            wait_for_sync(deployments_synced).await.context("error syncing Deployment cache")?;
            wait_for_sync(crds_synced).await.context("error syncing CRD cache")
        };
        if let Err(err) = synced.await {
            let _ = self.shutdown_tx.send(());
            scaler.stop_all().await;
            return Err(err);
        }

        let (eventmeshes_handle, _) = Informer::new(
            Arc::new(KubeWatchSource::new(Api::<EventMesh>::namespaced(self.client.clone(), &self.config.namespace))),
            self.eventmeshes.clone(),
        )
        .with_handler(Arc::new(EnqueueEventMesh::new(queue.clone())))
        .spawn(self.stop_signal());

        tracing::info!("k8s controller initialized");
        loop {
            tokio::select! {
                Some(()) = resync_rx.recv() => {
                    while resync_rx.try_recv().is_ok() {}
                    enqueue_all(&self.eventmeshes, &queue);
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        tracing::debug!("k8s controller shutting down");
        scaler.stop_all().await;
        for (name, handle) in [("EventMesh", eventmeshes_handle), ("Deployment", deployments_handle), ("CRD", crds_handle)] {
            if let Err(err) = handle.await {
                tracing::error!(error = ?err, informer = name, "error joining informer task");
            }
        }
        if let Err(err) = queue_handle.await {
            tracing::error!(error = ?err, "error joining work queue task");
        }
        tracing::debug!("k8s controller shutdown");
        Ok(())
    }

    /// A future resolving once graceful shutdown has been triggered.
    fn stop_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        async move {
            let _ = shutdown_rx.recv().await;
        }
    }
}
