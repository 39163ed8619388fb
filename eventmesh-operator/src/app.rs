//! The process shell of the operator.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::k8s::Controller;

/// The running operator, owning the controller task & the shutdown channel.
pub struct App {
    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for observing a shutdown triggered by the controller itself.
    shutdown_rx: BroadcastStream<()>,
    /// The join handle of the K8s controller.
    controller: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance, spawning the K8s controller.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(10);
        let client = kube::Client::try_default().await.context("error initializing K8s client")?;
        let controller = Controller::new(client, config, shutdown_tx.clone())?.spawn();
        Ok(Self {
            shutdown_rx: BroadcastStream::new(shutdown_rx),
            shutdown_tx,
            controller,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        self.wait_for_shutdown().await?;

        tracing::debug!("EventMesh Operator is shutting down");
        match self.controller.await.context("error joining k8s controller handle") {
            Ok(Ok(())) => (),
            Ok(Err(err)) | Err(err) => tracing::error!(error = ?err, "error shutting down k8s controller"),
        }
        tracing::debug!("EventMesh Operator shutdown complete");
        Ok(())
    }

    /// Wait for a termination signal or an internally triggered shutdown.
    ///
    /// A received signal is forwarded to every task through the shutdown channel.
    async fn wait_for_shutdown(&mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        for (name, kind) in [("sigterm", SignalKind::terminate()), ("sigint", SignalKind::interrupt())] {
            signals.insert(name, SignalStream::new(signal(kind).context("error building signal stream")?));
        }
        tokio::select! {
            Some((name, _)) = signals.next() => {
                tracing::debug!(signal = name, "signal received, beginning graceful shutdown");
                let _ = self.shutdown_tx.send(());
            }
            _ = self.shutdown_rx.next() => tracing::debug!("shutdown triggered internally"),
        }
        Ok(())
    }
}
