//! Schema-gated watches.
//!
//! A `GatedWatch` watches a resource kind whose CRD may not be installed yet. Starting the watch
//! polls for the CRD, then runs an informer and publishes its cache once the initial fill has
//! completed. Stopping the watch tears the informer down and clears the published cache.
//!
//! Start & stop are serialized by the lifecycle lock, while `query` only ever touches the
//! atomically swappable handle, so readers never wait on a lifecycle transition.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use arc_swap::ArcSwapOption;
use kube::Resource;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cluster::SchemaProbe;
use crate::watchers::{wait_for_sync, Cache, EventHandler, Informer, WatchSource};

/// A hook attaching a change handler to the cache of a freshly started watch.
pub type RegisterHook<K> = Arc<dyn Fn(Arc<Cache<K>>) -> Arc<dyn EventHandler<K>> + Send + Sync>;

/// Polling options of a gated watch.
#[derive(Clone, Debug)]
pub struct GatedWatchOptions {
    /// The interval at which the schema is polled.
    pub poll_interval: Duration,
    /// An optional bound on how long the schema is polled.
    pub poll_timeout: Option<Duration>,
}

impl Default for GatedWatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_timeout: None,
        }
    }
}

/// The outcome of polling for a schema.
#[derive(Debug, PartialEq)]
enum PollOutcome {
    Present,
    Cancelled,
    TimedOut,
}

/// The running state of a started watch.
struct RunningWatch {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// A watch of a resource kind which only runs while the kind's schema is installed.
pub struct GatedWatch<K> {
    /// The name of the gating CRD.
    schema: String,
    probe: Arc<dyn SchemaProbe>,
    source: Arc<dyn WatchSource<K>>,
    register: Option<RegisterHook<K>>,
    opts: GatedWatchOptions,
    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,

    /// The lifecycle lock, holding the running watch, if any.
    running: Mutex<Option<RunningWatch>>,
    /// The published cache of the running watch.
    handle: ArcSwapOption<Cache<K>>,
    /// A counter bumped by every stop, cancelling any in-flight schema poll.
    cancel_tx: watch::Sender<u64>,
}

impl<K> GatedWatch<K>
where
    K: Resource + Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new instance.
    pub fn new(
        schema: impl Into<String>, probe: Arc<dyn SchemaProbe>, source: Arc<dyn WatchSource<K>>, opts: GatedWatchOptions,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(0);
        Self {
            schema: schema.into(),
            probe,
            source,
            register: None,
            opts,
            shutdown_tx,
            running: Mutex::new(None),
            handle: ArcSwapOption::empty(),
            cancel_tx,
        }
    }

    /// Attach a change handler to the cache of every started watch.
    pub fn with_registration(mut self, hook: RegisterHook<K>) -> Self {
        self.register = Some(hook);
        self
    }

    /// The cache of the running watch, or `None` if not started.
    pub fn query(&self) -> Option<Arc<Cache<K>>> {
        self.handle.load_full()
    }

    /// Start this watch.
    ///
    /// Blocks until the schema is present and the initial cache fill has completed. Starting an
    /// already started watch is a no-op. If the initial fill fails, all partially created state is
    /// torn down and the error is returned; retrying is up to the caller.
    #[tracing::instrument(level = "debug", skip(self), fields(schema = %self.schema))]
    pub async fn start(&self) -> Result<()> {
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::debug!("watch already started");
            return Ok(());
        }

        match self.poll_schema(&mut cancel_rx).await {
            PollOutcome::Present => (),
            PollOutcome::Cancelled => {
                tracing::debug!("start cancelled while polling for schema");
                return Ok(());
            }
            PollOutcome::TimedOut => bail!("timed out waiting for CRD {}", self.schema),
        }

        let cache = Arc::new(Cache::default());
        let mut informer = Informer::new(self.source.clone(), cache.clone());
        if let Some(register) = &self.register {
            informer = informer.with_handler(register(cache.clone()));
        }
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let stop = async move {
            tokio::select! {
                _ = stop_rx => (),
                _ = shutdown_rx.recv() => (),
            }
        };
        let (handle, synced_rx) = informer.spawn(stop);

        let synced = tokio::select! {
            res = wait_for_sync(synced_rx) => res.map(|_| true),
            _ = cancel_rx.changed() => Ok(false),
        };
        match synced {
            Ok(true) => (),
            Ok(false) => {
                let _ = stop_tx.send(());
                handle.abort();
                tracing::debug!("start cancelled while waiting for initial cache fill");
                return Ok(());
            }
            Err(err) => {
                let _ = stop_tx.send(());
                handle.abort();
                return Err(err).with_context(|| format!("error syncing watch cache gated by CRD {}", self.schema));
            }
        }

        self.handle.store(Some(cache));
        *running = Some(RunningWatch { stop_tx, handle });
        tracing::info!("gated watch started");
        Ok(())
    }

    /// Stop this watch, clearing its published cache.
    ///
    /// Stopping a watch which is not started is a no-op.
    #[tracing::instrument(level = "debug", skip(self), fields(schema = %self.schema))]
    pub async fn stop(&self) {
        self.cancel_start();
        let mut running = self.running.lock().await;
        let watch = match running.take() {
            Some(watch) => watch,
            None => {
                tracing::debug!("watch not started");
                return;
            }
        };
        self.handle.store(None);
        let _ = watch.stop_tx.send(());
        if let Err(err) = watch.handle.await {
            tracing::error!(error = ?err, "error joining gated watch informer");
        }
        tracing::info!("gated watch stopped");
    }

    /// Cancel any in-flight start of this watch, without waiting on the lifecycle lock.
    pub fn cancel_start(&self) {
        self.cancel_tx.send_modify(|epoch| *epoch += 1);
    }

    /// Poll for the gating schema until it is present, the poll is cancelled or it times out.
    ///
    /// Probe errors are logged and polled through.
    async fn poll_schema(&self, cancel_rx: &mut watch::Receiver<u64>) -> PollOutcome {
        let deadline = self.opts.poll_timeout.map(|timeout| Instant::now() + timeout);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            match self.probe.schema_exists(&self.schema).await {
                Ok(true) => return PollOutcome::Present,
                Ok(false) => tracing::debug!("CRD not present yet"),
                Err(err) => tracing::debug!(error = ?err, "error checking for CRD"),
            }
            if matches!(deadline, Some(deadline) if Instant::now() >= deadline) {
                return PollOutcome::TimedOut;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.opts.poll_interval) => (),
                _ = cancel_rx.changed() => return PollOutcome::Cancelled,
                _ = shutdown_rx.recv() => return PollOutcome::Cancelled,
            }
        }
    }
}
