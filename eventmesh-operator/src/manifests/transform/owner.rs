use anyhow::Context;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::manifests::{Definition, Transformer};

/// Set the given owner as the controlling owner of every definition, except namespaces.
pub fn inject_owner(owner: OwnerReference) -> Transformer {
    Transformer::new(format!("owner {}/{}", owner.kind, owner.name), move |def: &mut Definition| {
        if def.kind() == "Namespace" {
            return Ok(());
        }
        let owner = serde_json::to_value(&owner).context("error serializing owner reference")?;
        def.set(&["metadata", "ownerReferences"], serde_json::Value::Array(vec![owner]))
    })
}
