//! Generic K8s watch machinery.
//!
//! An `Informer` drives a watch stream into a `Cache`, and dispatches add, update & delete
//! notifications to its registered `EventHandler`s after the cache has been updated.

mod edge;
mod gated;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use futures::stream::{BoxStream, StreamExt};
use kube::runtime::watcher::Event;
use kube::Resource;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use edge::{ClassFilter, EdgeTriggered, WakeFn};
pub use gated::{GatedWatch, GatedWatchOptions, RegisterHook};

/// The delay applied after an error from a watch stream.
const WATCH_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// The namespace & name of a K8s object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(String::from),
            name: name.into(),
        }
    }

    /// Build the key of the given object.
    pub fn of<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A read-only view over the objects observed by a watch.
pub trait Lister<K>: Send + Sync + 'static {
    /// List all currently known objects.
    fn list(&self) -> Result<Vec<Arc<K>>>;

    /// Check if the initial fill of the underlying cache has completed.
    fn has_synced(&self) -> bool;
}

/// A handler of change notifications coming from an `Informer`.
pub trait EventHandler<K>: Send + Sync + 'static {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

/// A source of watch event streams for a resource kind.
pub trait WatchSource<K>: Send + Sync + 'static {
    /// Open a new watch stream. The first event of a healthy stream is `Event::Restarted`.
    fn watch(&self) -> BoxStream<'static, Result<Event<K>>>;
}

/// An atomically swappable cache of watched objects.
pub struct Cache<K> {
    objects: ArcSwap<HashMap<ObjectKey, Arc<K>>>,
    synced: AtomicBool,
}

impl<K> Default for Cache<K> {
    fn default() -> Self {
        Self {
            objects: ArcSwap::from_pointee(HashMap::new()),
            synced: AtomicBool::new(false),
        }
    }
}

impl<K> Cache<K> {
    /// Get the object of the given key.
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.load().get(key).cloned()
    }

    /// A snapshot of all cached objects.
    pub fn snapshot(&self) -> Vec<Arc<K>> {
        self.objects.load().values().cloned().collect()
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    fn insert(&self, key: ObjectKey, obj: Arc<K>) -> Option<Arc<K>> {
        let orig = self.objects.load_full();
        let mut updated = orig.as_ref().clone();
        let old = updated.insert(key, obj);
        self.objects.store(Arc::new(updated));
        old
    }

    fn remove(&self, key: &ObjectKey) -> Option<Arc<K>> {
        let orig = self.objects.load_full();
        if !orig.contains_key(key) {
            return None;
        }
        let mut updated = orig.as_ref().clone();
        let old = updated.remove(key);
        self.objects.store(Arc::new(updated));
        old
    }

    fn keys(&self) -> Vec<ObjectKey> {
        self.objects.load().keys().cloned().collect()
    }
}

impl<K: Send + Sync + 'static> Lister<K> for Cache<K> {
    fn list(&self) -> Result<Vec<Arc<K>>> {
        Ok(self.snapshot())
    }

    fn has_synced(&self) -> bool {
        Cache::has_synced(self)
    }
}

/// A driver of a watch stream into a cache.
pub struct Informer<K> {
    source: Arc<dyn WatchSource<K>>,
    cache: Arc<Cache<K>>,
    handlers: Vec<Arc<dyn EventHandler<K>>>,
}

impl<K> Informer<K>
where
    K: Resource + Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new instance.
    pub fn new(source: Arc<dyn WatchSource<K>>, cache: Arc<Cache<K>>) -> Self {
        Self {
            source,
            cache,
            handlers: vec![],
        }
    }

    /// Register a handler to be notified of changes.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler<K>>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Spawn this informer, running until the given stop future resolves.
    ///
    /// The returned receiver resolves once the initial cache fill has completed, or with an error
    /// if the watch stream failed before the initial fill completed, in which case the informer
    /// stops on its own.
    pub fn spawn<F>(self, stop: F) -> (JoinHandle<()>, oneshot::Receiver<Result<()>>)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (synced_tx, synced_rx) = oneshot::channel();
        (tokio::spawn(self.run(stop, synced_tx)), synced_rx)
    }

    async fn run<F>(self, stop: F, synced_tx: oneshot::Sender<Result<()>>)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut stream = self.source.watch();
        let mut synced_tx = Some(synced_tx);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                event_res = stream.next() => match event_res {
                    Some(Ok(event)) => {
                        let is_restart = matches!(event, Event::Restarted(_));
                        self.handle_event(event);
                        if is_restart {
                            if let Some(tx) = synced_tx.take() {
                                self.cache.mark_synced();
                                let _ = tx.send(Ok(()));
                            }
                        }
                    }
                    Some(Err(err)) => {
                        if let Some(tx) = synced_tx.take() {
                            let _ = tx.send(Err(err.context("error during initial cache fill")));
                            break;
                        }
                        tracing::error!(error = ?err, "error from k8s watch stream");
                        tokio::select! {
                            _ = &mut stop => break,
                            _ = tokio::time::sleep(WATCH_ERROR_BACKOFF) => (),
                        }
                    }
                    None => {
                        if let Some(tx) = synced_tx.take() {
                            let _ = tx.send(Err(anyhow::anyhow!("watch stream closed before initial cache fill")));
                        }
                        tracing::debug!("watch stream closed");
                        break;
                    }
                },
            }
        }
    }

    /// Apply the given event to the cache, then notify all handlers.
    fn handle_event(&self, event: Event<K>) {
        match event {
            Event::Applied(obj) => {
                let obj = Arc::new(obj);
                match self.cache.insert(ObjectKey::of(obj.as_ref()), obj.clone()) {
                    Some(old) if old == obj => (),
                    Some(old) => self.handlers.iter().for_each(|h| h.on_update(&old, &obj)),
                    None => self.handlers.iter().for_each(|h| h.on_add(&obj)),
                }
            }
            Event::Deleted(obj) => {
                if let Some(old) = self.cache.remove(&ObjectKey::of(&obj)) {
                    self.handlers.iter().for_each(|h| h.on_delete(&old));
                }
            }
            // Apply the new state one key at a time, so that every handler call observes the
            // cache as of that single change. Adds & updates go first, then deletes.
            Event::Restarted(objs) => {
                let new_objects: HashMap<_, _> = objs.into_iter().map(|obj| (ObjectKey::of(&obj), Arc::new(obj))).collect();
                tracing::debug!(len = new_objects.len(), "watch cache restarted");
                for (key, obj) in new_objects.iter() {
                    match self.cache.insert(key.clone(), obj.clone()) {
                        Some(old) if &old == obj => (),
                        Some(old) => self.handlers.iter().for_each(|h| h.on_update(&old, obj)),
                        None => self.handlers.iter().for_each(|h| h.on_add(obj)),
                    }
                }
                let stale: Vec<_> = self.cache.keys().into_iter().filter(|key| !new_objects.contains_key(key)).collect();
                for key in stale {
                    if let Some(old) = self.cache.remove(&key) {
                        self.handlers.iter().for_each(|h| h.on_delete(&old));
                    }
                }
            }
        }
    }
}

/// Wait for the initial fill of a spawned informer.
pub async fn wait_for_sync(synced_rx: oneshot::Receiver<Result<()>>) -> Result<()> {
    synced_rx.await.context("informer stopped before its initial cache fill")?
}
