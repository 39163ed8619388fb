//! K8s API implementations of the cluster capability interfaces.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use eventmesh_core::crd::{EventMesh, EventMeshStatus};
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::client::Client;
use kube::runtime::watcher::{watcher, Event};
use kube::Resource;
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use crate::cluster::{DeploymentLister, ManifestClient, SchemaProbe, StatusWriter};
use crate::error::ClusterError;
use crate::manifests::Definition;
use crate::watchers::{Cache, ObjectKey, WatchSource};

/// The field manager used for server-side apply.
const FIELD_MANAGER: &str = "eventmesh-operator";
/// The timeout applied to individual K8s API calls.
const API_TIMEOUT: Duration = Duration::from_secs(10);
/// The message of a 404 returned for a kind which the cluster does not serve.
const NO_MATCHING_API_MSG: &str = "could not find the requested resource";

/// A manifest client applying definitions as dynamic objects.
pub struct KubeManifestClient {
    client: Client,
}

impl KubeManifestClient {
    /// Create a new instance.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build the dynamic API of the given definition.
    fn api(&self, def: &Definition) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(def.group(), def.version(), def.kind());
        let resource = ApiResource::from_gvk(&gvk);
        match def.namespace() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

#[async_trait]
impl ManifestClient for KubeManifestClient {
    #[tracing::instrument(level = "debug", skip(self, def), fields(id = %def.id()))]
    async fn apply(&self, def: &Definition) -> Result<(), ClusterError> {
        let api = self.api(def);
        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;
        timeout(API_TIMEOUT, api.patch(def.name(), &params, &Patch::Apply(def.as_value())))
            .await
            .with_context(|| format!("timeout while applying {}", def.id()))?
            .map(|_| ())
            .map_err(|err| cluster_error(err, def))
    }

    #[tracing::instrument(level = "debug", skip(self, def), fields(id = %def.id()))]
    async fn delete(&self, def: &Definition) -> Result<(), ClusterError> {
        let api = self.api(def);
        timeout(API_TIMEOUT, api.delete(def.name(), &Default::default()))
            .await
            .with_context(|| format!("timeout while deleting {}", def.id()))?
            .map(|_| ())
            .map_err(|err| cluster_error(err, def))
    }
}

/// Classify an API error returned for the given definition.
fn cluster_error(err: kube::Error, def: &Definition) -> ClusterError {
    match err {
        kube::Error::Api(api_err) if api_err.code == http::StatusCode::NOT_FOUND => {
            if api_err.message.contains(NO_MATCHING_API_MSG) {
                ClusterError::NoMatchingApi {
                    api_version: def.api_version().into(),
                    kind: def.kind().into(),
                }
            } else {
                ClusterError::NotFound(def.id())
            }
        }
        err => ClusterError::Other(anyhow::Error::new(err).context(format!("error from K8s API for {}", def.id()))),
    }
}

/// A schema probe which reads CRDs directly from the API.
pub struct ApiSchemaProbe {
    api: Api<CustomResourceDefinition>,
}

impl ApiSchemaProbe {
    /// Create a new instance.
    pub fn new(client: Client) -> Self {
        Self { api: Api::all(client) }
    }
}

#[async_trait]
impl SchemaProbe for ApiSchemaProbe {
    async fn schema_exists(&self, name: &str) -> Result<bool> {
        let res = timeout(API_TIMEOUT, self.api.get(name)).await.context("timeout while fetching CRD")?;
        match res {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == http::StatusCode::NOT_FOUND => Ok(false),
            Err(err) => Err(err).with_context(|| format!("error fetching CRD {}", name)),
        }
    }
}

#[async_trait]
impl SchemaProbe for Cache<CustomResourceDefinition> {
    async fn schema_exists(&self, name: &str) -> Result<bool> {
        Ok(Cache::get(self, &ObjectKey::new(None, name)).is_some())
    }
}

impl DeploymentLister for Cache<Deployment> {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<Deployment>>> {
        Ok(Cache::get(self, &ObjectKey::new(Some(namespace), name)))
    }
}

/// A watch source backed by a K8s watcher over the given API.
pub struct KubeWatchSource<K> {
    api: Api<K>,
}

impl<K> KubeWatchSource<K> {
    /// Create a new instance.
    pub fn new(api: Api<K>) -> Self {
        Self { api }
    }
}

impl<K> WatchSource<K> for KubeWatchSource<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn watch(&self) -> BoxStream<'static, Result<Event<K>>> {
        watcher(self.api.clone(), ListParams::default())
            .map(|res| res.context("error from k8s watcher"))
            .boxed()
    }
}

/// A status writer patching the status subresource of EventMesh objects.
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    /// Create a new instance.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    #[tracing::instrument(level = "debug", skip(self, em, status))]
    async fn write_status(&self, em: &EventMesh, status: &EventMeshStatus) -> Result<()> {
        let meta = em.meta();
        let (namespace, name) = (meta.namespace.as_deref().unwrap_or_default(), meta.name.as_deref().unwrap_or_default());
        let api: Api<EventMesh> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        timeout(API_TIMEOUT, api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await
            .context("timeout while patching EventMesh status")?
            .context("error patching EventMesh status")
            .map(|_| ())
    }
}
