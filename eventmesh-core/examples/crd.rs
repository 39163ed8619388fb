//! A script used to generate the CRD of the EventMesh resource.
//!
//! Any time the CRD spec changes, this script can be run to ensure that the CRD is up-to-date and
//! ready to be synced with the cluster.

use anyhow::{Context, Result};
use eventmesh_core::crd::EventMesh;
use kube::CustomResourceExt;

fn main() -> Result<()> {
    let canon = std::fs::canonicalize("..").context("error getting canonical path of current dir")?;
    let crds_path = canon.join("config").join("crds");
    std::fs::create_dir_all(&crds_path).with_context(|| format!("error creating CRD dir {:?}", &crds_path))?;

    let eventmesh = EventMesh::crd();
    let eventmesh_yaml = serde_yaml::to_string(&eventmesh).context("error serializing EventMesh CRD to yaml")?;
    std::fs::write(crds_path.join("eventmesh.yaml"), &eventmesh_yaml).with_context(|| format!("error writing EventMesh CRD to {:?}", &crds_path))?;
    println!("EventMesh CRD written to {:?}", &crds_path);

    Ok(())
}
