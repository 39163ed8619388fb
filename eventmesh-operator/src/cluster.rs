//! Capability interfaces over the cluster.
//!
//! Every cluster interaction of the control loop goes through one of these traits, which are
//! implemented over the K8s API in `crate::k8s` and over in-memory fakes in tests.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use eventmesh_core::crd::{EventMesh, EventMeshStatus};
use k8s_openapi::api::apps::v1::Deployment;

use crate::error::ClusterError;
use crate::manifests::Definition;

/// The name of the CRD installed by the certificate manager.
pub const CERT_MANAGER_SCHEMA: &str = "certificates.cert-manager.io";

/// A query for whether an extension schema is installed in the cluster.
#[async_trait]
pub trait SchemaProbe: Send + Sync + 'static {
    /// Check if the CRD of the given name exists.
    async fn schema_exists(&self, name: &str) -> Result<bool>;
}

/// An indexed read of the Deployments in the cluster.
pub trait DeploymentLister: Send + Sync + 'static {
    /// Get the Deployment of the given namespace & name, if it exists.
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<Deployment>>>;
}

/// A client which applies & deletes manifest definitions.
#[async_trait]
pub trait ManifestClient: Send + Sync + 'static {
    /// Apply the given definition to the cluster.
    async fn apply(&self, def: &Definition) -> Result<(), ClusterError>;

    /// Delete the object of the given definition from the cluster.
    async fn delete(&self, def: &Definition) -> Result<(), ClusterError>;
}

/// A writer of the status of EventMesh objects.
#[async_trait]
pub trait StatusWriter: Send + Sync + 'static {
    /// Replace the status of the given EventMesh.
    async fn write_status(&self, em: &EventMesh, status: &EventMeshStatus) -> Result<()>;
}
