//! In-memory fakes of the cluster capabilities, along with object & manifest builders.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use eventmesh_core::crd::{Broker, BrokerSpec, EventMesh, EventMeshSpec, EventMeshStatus, InMemoryChannel, InMemoryChannelSpec, BROKER_CLASS_ANNOTATION};
use eventmesh_core::VERSION_LABEL;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::runtime::watcher::Event;
use kube::Resource;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::cluster::{DeploymentLister, ManifestClient, SchemaProbe, StatusWriter};
use crate::config::AutoscalerTable;
use crate::error::ClusterError;
use crate::manifests::{Definition, ManifestSource, ParseContext};
use crate::scaler::ScaleTargets;
use crate::watchers::{Lister, ObjectKey, WatchSource};

pub const NAMESPACE: &str = "knative-eventing";

/// Wait until the given condition holds, failing after a bounded number of attempts.
pub async fn eventually<F: Fn() -> bool>(cond: F, msg: &str) -> Result<()> {
    for _ in 0..200 {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    anyhow::bail!("condition not met: {}", msg)
}

/// A schema probe over a mutable set of installed schemas.
#[derive(Default)]
pub struct FakeSchemaProbe {
    present: Mutex<HashSet<String>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeSchemaProbe {
    pub fn with(schemas: &[&str]) -> Arc<Self> {
        let probe = Self::default();
        for schema in schemas {
            probe.set_present(schema, true);
        }
        Arc::new(probe)
    }

    pub fn set_present(&self, schema: &str, present: bool) {
        let mut schemas = self.present.lock().expect("schema probe lock poisoned");
        if present {
            schemas.insert(schema.into());
        } else {
            schemas.remove(schema);
        }
    }

    /// Make every following probe fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaProbe for FakeSchemaProbe {
    async fn schema_exists(&self, name: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("injected schema probe failure"));
        }
        Ok(self.present.lock().expect("schema probe lock poisoned").contains(name))
    }
}

struct SourceState<K> {
    objects: BTreeMap<ObjectKey, K>,
    subscribers: Vec<mpsc::UnboundedSender<Result<Event<K>>>>,
}

/// A watch source fed from memory.
///
/// Every opened watch starts with a `Restarted` event of the current objects, followed by all
/// changes made through `apply` & `delete`.
pub struct FakeWatchSource<K> {
    state: Mutex<SourceState<K>>,
    fail_next_watch: AtomicBool,
    watches: AtomicUsize,
}

impl<K: Resource + Clone + Send + Sync + 'static> FakeWatchSource<K> {
    pub fn new(objects: Vec<K>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SourceState {
                objects: objects.into_iter().map(|obj| (ObjectKey::of(&obj), obj)).collect(),
                subscribers: vec![],
            }),
            fail_next_watch: AtomicBool::new(false),
            watches: AtomicUsize::new(0),
        })
    }

    /// Create or update the given object.
    pub fn apply(&self, obj: K) {
        let mut state = self.state.lock().expect("watch source lock poisoned");
        state.objects.insert(ObjectKey::of(&obj), obj.clone());
        state.subscribers.retain(|tx| tx.send(Ok(Event::Applied(obj.clone()))).is_ok());
    }

    /// Delete the given object.
    pub fn delete(&self, obj: &K) {
        let mut state = self.state.lock().expect("watch source lock poisoned");
        if let Some(old) = state.objects.remove(&ObjectKey::of(obj)) {
            state.subscribers.retain(|tx| tx.send(Ok(Event::Deleted(old.clone()))).is_ok());
        }
    }

    /// Make the next opened watch fail before its initial fill.
    pub fn fail_next_watch(&self) {
        self.fail_next_watch.store(true, Ordering::SeqCst);
    }

    /// The number of watches opened so far.
    pub fn watches(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }
}

impl<K: Resource + Clone + Send + Sync + 'static> WatchSource<K> for FakeWatchSource<K> {
    fn watch(&self) -> BoxStream<'static, Result<Event<K>>> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_watch.swap(false, Ordering::SeqCst) {
            return futures::stream::once(async { Err(anyhow!("injected watch failure")) }).boxed();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().expect("watch source lock poisoned");
        let _ = tx.send(Ok(Event::Restarted(state.objects.values().cloned().collect())));
        state.subscribers.push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }
}

/// A lister over a fixed set of objects.
pub struct FakeLister<K> {
    objects: Mutex<Vec<Arc<K>>>,
    synced: AtomicBool,
    fail: AtomicBool,
}

impl<K: Send + Sync + 'static> FakeLister<K> {
    pub fn new(objects: Vec<K>) -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(objects.into_iter().map(Arc::new).collect()),
            synced: AtomicBool::new(true),
            fail: AtomicBool::new(false),
        })
    }

    pub fn set_objects(&self, objects: Vec<K>) {
        *self.objects.lock().expect("lister lock poisoned") = objects.into_iter().map(Arc::new).collect();
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl<K: Send + Sync + 'static> Lister<K> for FakeLister<K> {
    fn list(&self) -> Result<Vec<Arc<K>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("injected list failure"));
        }
        Ok(self.objects.lock().expect("lister lock poisoned").clone())
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

/// A deployment lister over a mutable set of deployments.
#[derive(Default)]
pub struct FakeDeployments {
    deployments: Mutex<HashMap<(String, String), Arc<Deployment>>>,
    fail: AtomicBool,
}

impl FakeDeployments {
    pub fn with(deployments: Vec<Deployment>) -> Arc<Self> {
        let lister = Self::default();
        for deployment in deployments {
            lister.insert(deployment);
        }
        Arc::new(lister)
    }

    pub fn insert(&self, deployment: Deployment) {
        let key = (
            deployment.metadata.namespace.clone().unwrap_or_default(),
            deployment.metadata.name.clone().unwrap_or_default(),
        );
        self.deployments.lock().expect("deployments lock poisoned").insert(key, Arc::new(deployment));
    }

    /// Install a deployment for every Deployment definition of the given set, carrying over the
    /// owner references of the definitions.
    pub fn install_all<'a>(&self, defs: impl IntoIterator<Item = &'a Definition>, available: bool) {
        for def in defs.into_iter().filter(|def| def.kind() == "Deployment") {
            let namespace = def.namespace().unwrap_or(NAMESPACE);
            let version = def.label(VERSION_LABEL).unwrap_or("0.0.0");
            let mut live = deployment(namespace, def.name(), version, available);
            live.metadata.owner_references = def
                .get(&["metadata", "ownerReferences"])
                .and_then(|refs| serde_json::from_value::<Vec<OwnerReference>>(refs.clone()).ok());
            self.insert(live);
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl DeploymentLister for FakeDeployments {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<Deployment>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("injected deployment lister failure"));
        }
        let deployments = self.deployments.lock().expect("deployments lock poisoned");
        Ok(deployments.get(&(namespace.to_string(), name.to_string())).cloned())
    }
}

/// The error injected into a client operation.
#[derive(Clone, Copy, Debug)]
pub enum Injected {
    NotFound,
    NoMatchingApi,
    Other,
}

impl Injected {
    fn into_error(self, def: &Definition) -> ClusterError {
        match self {
            Self::NotFound => ClusterError::NotFound(def.id()),
            Self::NoMatchingApi => ClusterError::NoMatchingApi {
                api_version: def.api_version().into(),
                kind: def.kind().into(),
            },
            Self::Other => ClusterError::Other(anyhow!("injected client failure for {}", def.id())),
        }
    }
}

/// A manifest client recording every operation.
#[derive(Default)]
pub struct RecordingClient {
    ops: Mutex<Vec<(&'static str, String)>>,
    delete_errors: Mutex<HashMap<String, Injected>>,
    apply_errors: Mutex<HashMap<String, Injected>>,
}

impl RecordingClient {
    /// All recorded operations as `(op, definition id)` pairs, in order.
    pub fn ops(&self) -> Vec<(&'static str, String)> {
        self.ops.lock().expect("client lock poisoned").clone()
    }

    /// The ids of all applied definitions, in order.
    pub fn applied(&self) -> Vec<String> {
        self.ops().into_iter().filter(|(op, _)| *op == "apply").map(|(_, id)| id).collect()
    }

    /// The ids of all deleted definitions, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.ops().into_iter().filter(|(op, _)| *op == "delete").map(|(_, id)| id).collect()
    }

    pub fn fail_delete(&self, id: &str, err: Injected) {
        self.delete_errors.lock().expect("client lock poisoned").insert(id.into(), err);
    }

    pub fn fail_apply(&self, id: &str, err: Injected) {
        self.apply_errors.lock().expect("client lock poisoned").insert(id.into(), err);
    }
}

#[async_trait]
impl ManifestClient for RecordingClient {
    async fn apply(&self, def: &Definition) -> Result<(), ClusterError> {
        self.ops.lock().expect("client lock poisoned").push(("apply", def.id()));
        match self.apply_errors.lock().expect("client lock poisoned").get(&def.id()) {
            Some(err) => Err(err.into_error(def)),
            None => Ok(()),
        }
    }

    async fn delete(&self, def: &Definition) -> Result<(), ClusterError> {
        self.ops.lock().expect("client lock poisoned").push(("delete", def.id()));
        match self.delete_errors.lock().expect("client lock poisoned").get(&def.id()) {
            Some(err) => Err(err.into_error(def)),
            None => Ok(()),
        }
    }
}

/// A status writer recording every written status.
#[derive(Default)]
pub struct RecordingStatus {
    written: Mutex<Vec<EventMeshStatus>>,
    fail: AtomicBool,
}

impl RecordingStatus {
    /// The most recently written status.
    pub fn last(&self) -> Option<EventMeshStatus> {
        self.written.lock().expect("status lock poisoned").last().cloned()
    }

    pub fn writes(&self) -> usize {
        self.written.lock().expect("status lock poisoned").len()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusWriter for RecordingStatus {
    async fn write_status(&self, _em: &EventMesh, status: &EventMeshStatus) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("injected status write failure"));
        }
        self.written.lock().expect("status lock poisoned").push(status.clone());
        Ok(())
    }
}

/// Scale targets fixed by the test.
#[derive(Default)]
pub struct FixedTargets {
    pub imc: AtomicUsize,
    pub mt_broker: AtomicUsize,
}

impl FixedTargets {
    pub fn new(imc: usize, mt_broker: usize) -> Arc<Self> {
        Arc::new(Self {
            imc: AtomicUsize::new(imc),
            mt_broker: AtomicUsize::new(mt_broker),
        })
    }
}

impl ScaleTargets for FixedTargets {
    fn imc_scale_target(&self) -> i32 {
        self.imc.load(Ordering::SeqCst) as i32
    }

    fn mt_broker_scale_target(&self) -> i32 {
        self.mt_broker.load(Ordering::SeqCst) as i32
    }
}

/// Build a deployment carrying the given version label.
pub fn deployment(namespace: &str, name: &str, version: &str, available: bool) -> Deployment {
    let mut labels = BTreeMap::new();
    labels.insert(VERSION_LABEL.to_string(), version.to_string());
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(DeploymentStatus {
            conditions: Some(vec![DeploymentCondition {
                type_: "Available".into(),
                status: if available { "True" } else { "False" }.into(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build an EventMesh in the system namespace.
pub fn eventmesh(spec: EventMeshSpec) -> EventMesh {
    let mut em = EventMesh::new("knative-eventing", spec);
    em.metadata.namespace = Some(NAMESPACE.into());
    em.metadata.uid = Some("6d0a56a1-4fa6-4a3e-a4a2-000000000001".into());
    em.metadata.generation = Some(1);
    em
}

/// Build a broker, annotated with the given class if any.
pub fn broker(name: &str, class: Option<&str>) -> Broker {
    let mut broker = Broker::new(name, BrokerSpec::default());
    broker.metadata.namespace = Some("default".into());
    if let Some(class) = class {
        let mut annotations = BTreeMap::new();
        annotations.insert(BROKER_CLASS_ANNOTATION.to_string(), class.to_string());
        broker.metadata.annotations = Some(annotations);
    }
    broker
}

pub fn imc(name: &str) -> InMemoryChannel {
    let mut imc = InMemoryChannel::new(name, InMemoryChannelSpec::default());
    imc.metadata.namespace = Some("default".into());
    imc
}

pub fn crd(name: &str) -> CustomResourceDefinition {
    CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(name.into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// The YAML of a Deployment with a single container.
pub fn deployment_yaml(name: &str, version: &str) -> String {
    format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}
  namespace: {ns}
  labels:
    {label}: "{version}"
spec:
  replicas: 1
  template:
    spec:
      containers:
        - name: {name}
          image: example.com/{name}:{version}
"#,
        name = name,
        ns = NAMESPACE,
        label = VERSION_LABEL,
        version = version
    )
}

fn hpa_yaml(name: &str, target: &str) -> String {
    format!(
        r#"apiVersion: autoscaling/v2
kind: HorizontalPodAutoscaler
metadata:
  name: {name}
  namespace: {ns}
spec:
  scaleTargetRef:
    apiVersion: apps/v1
    kind: Deployment
    name: {target}
  minReplicas: 1
  maxReplicas: 10
"#,
        name = name,
        ns = NAMESPACE,
        target = target
    )
}

fn config_map_yaml(name: &str, data: &str) -> String {
    format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\n  namespace: {}\ndata:\n{}", name, NAMESPACE, data)
}

fn certificate_yaml(name: &str) -> String {
    format!(
        "apiVersion: cert-manager.io/v1\nkind: Certificate\nmetadata:\n  name: {}\n  namespace: {}\nspec:\n  secretName: {}\n",
        name, NAMESPACE, name
    )
}

fn job_yaml(generate_name: &str) -> String {
    format!(
        "apiVersion: batch/v1\nkind: Job\nmetadata:\n  generateName: {}\n  namespace: {}\nspec:\n  template:\n    spec:\n      containers:\n        - name: migrate\n",
        generate_name, NAMESPACE
    )
}

fn docs(docs: &[String]) -> String {
    docs.join("---\n")
}

/// Write a manifest directory of all components at the given version.
pub fn manifests_dir(version: &str) -> Result<TempDir> {
    let dir = tempfile::tempdir().context("error creating manifests tempdir")?;
    let files: Vec<(&str, &str, String)> = vec![
        (
            "eventing-latest",
            "eventing-crds.yaml",
            "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: brokers.eventing.knative.dev\n".into(),
        ),
        (
            "eventing-latest",
            "eventing-core.yaml",
            docs(&[
                format!("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {}\n", NAMESPACE),
                config_map_yaml(
                    "config-logging",
                    "  loglevel.controller: info\n  loglevel.webhook: info\n  zap-logger-config: |\n    {\"level\": \"info\"}\n",
                ),
                config_map_yaml("config-features", "  kreference-group: disabled\n"),
                config_map_yaml("default-ch-webhook", "  default-ch-config: \"\"\n"),
                config_map_yaml("config-br-defaults", "  default-br-config: \"\"\n"),
                deployment_yaml("eventing-controller", version),
                deployment_yaml("eventing-webhook", version),
                hpa_yaml("eventing-webhook", "eventing-webhook"),
                "apiVersion: admissionregistration.k8s.io/v1\nkind: ValidatingWebhookConfiguration\nmetadata:\n  name: validation.webhook.eventing.knative.dev\n".into(),
            ]),
        ),
        (
            "eventing-latest",
            "in-memory-channel.yaml",
            docs(&[deployment_yaml("imc-controller", version), deployment_yaml("imc-dispatcher", version)]),
        ),
        (
            "eventing-latest",
            "mt-channel-broker.yaml",
            docs(&[
                deployment_yaml("mt-broker-controller", version),
                deployment_yaml("mt-broker-ingress", version),
                deployment_yaml("mt-broker-filter", version),
                hpa_yaml("broker-ingress-hpa", "mt-broker-ingress"),
                hpa_yaml("broker-filter-hpa", "mt-broker-filter"),
            ]),
        ),
        ("eventing-latest", "eventing-tls-networking.yaml", certificate_yaml("eventing-ca")),
        ("eventing-latest", "eventing-post-install.yaml", job_yaml("storage-version-migration-eventing-")),
        (
            "eventing-kafka-broker-latest",
            "eventing-kafka-controller.yaml",
            docs(&[
                config_map_yaml(
                    "kafka-config-logging",
                    "  config.xml: |\n    <configuration>\n      <root level=\"INFO\"/>\n    </configuration>\n",
                ),
                deployment_yaml("kafka-controller", version),
            ]),
        ),
        (
            "eventing-kafka-broker-latest",
            "eventing-kafka-broker.yaml",
            docs(&[
                config_map_yaml("kafka-broker-config", "  default.topic.partitions: \"10\"\n  bootstrap.servers: \"\"\n"),
                deployment_yaml("kafka-broker-receiver", version),
                deployment_yaml("kafka-broker-dispatcher", version),
            ]),
        ),
        (
            "eventing-kafka-broker-latest",
            "eventing-kafka-channel.yaml",
            docs(&[
                config_map_yaml("kafka-channel-config", "  bootstrap.servers: \"\"\n"),
                deployment_yaml("kafka-channel-dispatcher", version),
            ]),
        ),
        ("eventing-kafka-broker-latest", "eventing-kafka-sink.yaml", deployment_yaml("kafka-sink-receiver", version)),
        ("eventing-kafka-broker-latest", "eventing-kafka-source.yaml", deployment_yaml("kafka-source-dispatcher", version)),
        ("eventing-kafka-broker-latest", "eventing-kafka-tls-networking.yaml", certificate_yaml("kafka-ca")),
        ("eventing-kafka-broker-latest", "eventing-kafka-post-install.yaml", job_yaml("kafka-controller-post-install-")),
    ];
    for (component, file, content) in files {
        let component_dir = dir.path().join(component);
        std::fs::create_dir_all(&component_dir).context("error creating component dir")?;
        std::fs::write(component_dir.join(file), content).with_context(|| format!("error writing {}", file))?;
    }
    Ok(dir)
}

/// Build a parse context over the given manifests dir & fakes.
pub fn parse_context(dir: &TempDir, schemas: Arc<FakeSchemaProbe>, deployments: Arc<FakeDeployments>) -> ParseContext {
    ParseContext {
        source: ManifestSource::new(dir.path()),
        schemas,
        deployments,
        namespace: NAMESPACE.into(),
        autoscalers: AutoscalerTable::default(),
    }
}
