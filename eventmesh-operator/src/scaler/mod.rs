//! Scaling decisions for shared infrastructure.
//!
//! The in-memory channel & multi-tenant broker workloads only need to run while at least one
//! object of their dependent kind exists. The `Scaler` watches those kinds through gated watches,
//! derives a 0/1 replica target per workload family, and wakes the reconciler whenever a target
//! may have changed.


use std::sync::Arc;

use eventmesh_core::crd::{Broker, InMemoryChannel};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::Resource;
use tokio::sync::watch;

use crate::cluster::SchemaProbe;
use crate::watchers::{Cache, ClassFilter, EdgeTriggered, EventHandler, GatedWatch, GatedWatchOptions, WakeFn, WatchSource};

/// The name of the InMemoryChannel CRD.
pub const IMC_SCHEMA: &str = "inmemorychannels.messaging.knative.dev";
/// The name of the Broker CRD.
pub const BROKER_SCHEMA: &str = "brokers.eventing.knative.dev";
/// The broker class served by the multi-tenant channel based broker.
pub const MT_CHANNEL_BROKER_CLASS: &str = "MTChannelBasedBroker";

/// A family of workloads scaled together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    /// The in-memory channel workloads.
    Imc,
    /// The multi-tenant channel based broker workloads.
    MtBroker,
}

/// All workloads scaled by the scaler, along with their family.
pub const SCALED_WORKLOADS: &[(&str, Family)] = &[
    ("imc-controller", Family::Imc),
    ("imc-dispatcher", Family::Imc),
    ("mt-broker-controller", Family::MtBroker),
    ("mt-broker-ingress", Family::MtBroker),
    ("mt-broker-filter", Family::MtBroker),
];

/// The gating schema of each family.
const SCHEMAS: &[(&str, Family)] = &[(IMC_SCHEMA, Family::Imc), (BROKER_SCHEMA, Family::MtBroker)];

/// A source of replica targets per workload family.
pub trait ScaleTargets: Send + Sync + 'static {
    /// The replica target of the in-memory channel workloads.
    fn imc_scale_target(&self) -> i32;

    /// The replica target of the multi-tenant broker workloads.
    fn mt_broker_scale_target(&self) -> i32;

    /// The replica target of the given family.
    fn scale_target(&self, family: Family) -> i32 {
        match family {
            Family::Imc => self.imc_scale_target(),
            Family::MtBroker => self.mt_broker_scale_target(),
        }
    }
}

/// The scaling decision engine.
pub struct Scaler {
    imc: GatedWatch<InMemoryChannel>,
    brokers: GatedWatch<Broker>,
    wake: WakeFn,
}

impl Scaler {
    /// Create a new instance.
    ///
    /// The given wake callback is invoked on every population transition of a watched kind, and
    /// after a gated watch started or stopped while its family had a non-zero target.
    pub fn new(
        probe: Arc<dyn SchemaProbe>, imcs: Arc<dyn WatchSource<InMemoryChannel>>, brokers: Arc<dyn WatchSource<Broker>>, opts: GatedWatchOptions,
        shutdown_tx: tokio::sync::broadcast::Sender<()>, wake: WakeFn,
    ) -> Self {
        let imc_wake = wake.clone();
        let imc = GatedWatch::new(IMC_SCHEMA, probe.clone(), imcs, opts.clone(), shutdown_tx.clone()).with_registration(Arc::new(
            move |cache: Arc<Cache<InMemoryChannel>>| -> Arc<dyn EventHandler<InMemoryChannel>> { Arc::new(EdgeTriggered::new(cache, None, imc_wake.clone())) },
        ));

        let broker_wake = wake.clone();
        let brokers = GatedWatch::new(BROKER_SCHEMA, probe, brokers, opts, shutdown_tx).with_registration(Arc::new(
            move |cache: Arc<Cache<Broker>>| -> Arc<dyn EventHandler<Broker>> {
                Arc::new(EdgeTriggered::new(cache, Some(broker_class_filter()), broker_wake.clone()))
            },
        ));

        Self { imc, brokers, wake }
    }

    /// Start the watch of the given family, waking the reconciler if its target became non-zero.
    pub async fn start(&self, family: Family) -> anyhow::Result<()> {
        match family {
            Family::Imc => self.imc.start().await?,
            Family::MtBroker => self.brokers.start().await?,
        }
        if self.scale_target(family) > 0 {
            tracing::debug!(?family, "watch started with a non-empty population, waking");
            (self.wake)();
        }
        Ok(())
    }

    /// Stop the watch of the given family, waking the reconciler if its target dropped to zero.
    pub async fn stop(&self, family: Family) {
        let had_target = self.scale_target(family) > 0;
        match family {
            Family::Imc => self.imc.stop().await,
            Family::MtBroker => self.brokers.stop().await,
        }
        if had_target {
            tracing::debug!(?family, "watch stopped with a non-empty population, waking");
            (self.wake)();
        }
    }

    /// Cancel an in-flight start of the watch of the given family.
    pub fn cancel_start(&self, family: Family) {
        match family {
            Family::Imc => self.imc.cancel_start(),
            Family::MtBroker => self.brokers.cancel_start(),
        }
    }

    /// Stop all watches.
    pub async fn stop_all(&self) {
        self.imc.stop().await;
        self.brokers.stop().await;
    }
}

impl ScaleTargets for Scaler {
    fn imc_scale_target(&self) -> i32 {
        let cache = match self.imc.query() {
            Some(cache) => cache,
            None => return 0,
        };
        let imcs = cache.snapshot();
        tracing::debug!(count = imcs.len(), "found in-memory channels");
        if imcs.is_empty() {
            0
        } else {
            1
        }
    }

    fn mt_broker_scale_target(&self) -> i32 {
        let cache = match self.brokers.query() {
            Some(cache) => cache,
            None => return 0,
        };
        let brokers = cache.snapshot();
        let mt_brokers = brokers.iter().filter(|broker| broker.class() == Some(MT_CHANNEL_BROKER_CLASS)).count();
        tracing::debug!(count = mt_brokers, total = brokers.len(), "found multi-tenant brokers");
        if mt_brokers == 0 {
            0
        } else {
            1
        }
    }
}

/// Brokers share a class if their class annotations are equal, including both being absent.
fn broker_class_filter() -> ClassFilter<Broker> {
    Arc::new(|changed: &Broker, candidate: &Broker| changed.class() == candidate.class())
}

/// Get the family gated by the CRD of the given name.
fn family_of_schema(name: &str) -> Option<Family> {
    SCHEMAS.iter().find(|(schema, _)| *schema == name).map(|(_, family)| *family)
}

/// Starts & stops the scaler's watches as their CRDs appear & disappear.
///
/// Every family has a single driver task applying the latest observed CRD presence, so that the
/// start & stop of one family are never reordered. A removal cancels an in-flight start first.
pub struct ScalerSchemaHandler {
    scaler: Arc<Scaler>,
    imc_tx: watch::Sender<bool>,
    broker_tx: watch::Sender<bool>,
}

impl ScalerSchemaHandler {
    /// Create a new instance, spawning a driver task per family.
    pub fn new(scaler: Arc<Scaler>) -> Self {
        let (imc_tx, imc_rx) = watch::channel(false);
        let (broker_tx, broker_rx) = watch::channel(false);
        tokio::spawn(drive_family(scaler.clone(), Family::Imc, imc_rx));
        tokio::spawn(drive_family(scaler.clone(), Family::MtBroker, broker_rx));
        Self { scaler, imc_tx, broker_tx }
    }

    /// Record the presence of the gating CRD of the given family.
    fn set_present(&self, family: Family, present: bool) {
        let tx = match family {
            Family::Imc => &self.imc_tx,
            Family::MtBroker => &self.broker_tx,
        };
        if !present {
            self.scaler.cancel_start(family);
        }
        if tx.send(present).is_err() {
            tracing::error!(?family, "scaler driver task is gone, dropping CRD change");
        }
    }
}

impl EventHandler<CustomResourceDefinition> for ScalerSchemaHandler {
    fn on_add(&self, crd: &CustomResourceDefinition) {
        let name = crd.meta().name.clone().unwrap_or_default();
        if let Some(family) = family_of_schema(&name) {
            tracing::debug!(crd = %name, "CRD added, starting watch");
            self.set_present(family, true);
        }
    }

    fn on_update(&self, _old: &CustomResourceDefinition, _new: &CustomResourceDefinition) {}

    fn on_delete(&self, crd: &CustomResourceDefinition) {
        let name = crd.meta().name.clone().unwrap_or_default();
        if let Some(family) = family_of_schema(&name) {
            tracing::debug!(crd = %name, "CRD removed, stopping watch");
            self.set_present(family, false);
        }
    }
}

/// Apply the latest CRD presence of a family until its handler is dropped.
async fn drive_family(scaler: Arc<Scaler>, family: Family, mut present_rx: watch::Receiver<bool>) {
    while present_rx.changed().await.is_ok() {
        let present = *present_rx.borrow();
        if present {
            if let Err(err) = scaler.start(family).await {
                tracing::error!(error = ?err, ?family, "error starting watch gated by CRD");
            }
        } else {
            scaler.stop(family).await;
        }
    }
}
