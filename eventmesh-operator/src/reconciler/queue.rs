//! A de-duplicating work queue of reconcile requests.
//!
//! Requests are keyed by object. A key is processed by at most one worker at a time: a request
//! arriving while its key is in flight re-runs the key once the in-flight pass finishes. Failed
//! passes are requeued after a fixed delay.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::watchers::ObjectKey;

/// A handler of queued keys.
#[async_trait]
pub trait KeyHandler: Send + Sync + 'static {
    /// Process the given key. An error requeues the key after the queue's requeue delay.
    async fn handle(&self, key: &ObjectKey) -> Result<()>;
}

/// A handle used to enqueue keys.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<ObjectKey>,
}

impl WorkQueue {
    /// Spawn a new queue running until shutdown, processing keys with at most `workers`
    /// concurrent handler calls.
    pub fn spawn(handler: Arc<dyn KeyHandler>, workers: usize, requeue_delay: Duration, shutdown_tx: broadcast::Sender<()>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let workers = workers.max(1);
        let runner = QueueRunner {
            handler,
            workers,
            semaphore: Arc::new(Semaphore::new(workers)),
            requeue_delay,
            tx: tx.clone(),
            rx,
            done_tx,
            done_rx,
            shutdown_rx: shutdown_tx.subscribe(),
            pending: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            dirty: HashSet::new(),
        };
        (Self { tx }, tokio::spawn(runner.run()))
    }

    /// Request a reconcile of the given key.
    pub fn enqueue(&self, key: ObjectKey) {
        if self.tx.send(key).is_err() {
            tracing::debug!("work queue stopped, dropping request");
        }
    }
}

struct QueueRunner {
    handler: Arc<dyn KeyHandler>,
    workers: usize,
    semaphore: Arc<Semaphore>,
    requeue_delay: Duration,

    /// A sender of new requests, used for requeues.
    tx: mpsc::UnboundedSender<ObjectKey>,
    rx: mpsc::UnboundedReceiver<ObjectKey>,
    /// A channel of finished passes.
    done_tx: mpsc::UnboundedSender<(ObjectKey, bool)>,
    done_rx: mpsc::UnboundedReceiver<(ObjectKey, bool)>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: broadcast::Receiver<()>,

    /// Keys waiting for a worker, in arrival order.
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    /// In-flight keys requested again while in flight.
    dirty: HashSet<ObjectKey>,
}

impl QueueRunner {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(key) = self.rx.recv() => self.push(key),
                Some((key, ok)) = self.done_rx.recv() => self.complete(key, ok),
                _ = self.shutdown_rx.recv() => break,
            }
            self.dispatch();
        }

        tracing::debug!("work queue shutting down");
        // Wait for all in-flight passes.
        let _ = self.semaphore.acquire_many(self.workers as u32).await;
        tracing::debug!("work queue shutdown");
    }

    fn push(&mut self, key: ObjectKey) {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
        }
    }

    fn complete(&mut self, key: ObjectKey, ok: bool) {
        self.in_flight.remove(&key);
        if self.dirty.remove(&key) {
            self.push(key);
        } else if !ok {
            let (tx, delay) = (self.tx.clone(), self.requeue_delay);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(key);
            });
        }
    }

    /// Hand pending keys to workers while permits are available.
    fn dispatch(&mut self) {
        while !self.pending.is_empty() {
            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let key = match self.pending.pop_front() {
                Some(key) => key,
                None => break,
            };
            self.queued.remove(&key);
            self.in_flight.insert(key.clone());

            let (handler, done_tx) = (self.handler.clone(), self.done_tx.clone());
            tokio::spawn(async move {
                let ok = match handler.handle(&key).await {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::error!(error = ?err, %key, "error reconciling, requeueing");
                        false
                    }
                };
                drop(permit);
                let _ = done_tx.send((key, ok));
            });
        }
    }
}
