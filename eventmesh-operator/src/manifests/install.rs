//! Installation of a transformed & sorted manifest set.

use anyhow::{Context, Result};

use crate::cluster::ManifestClient;
use crate::manifests::ManifestSet;

/// Install the given manifest set.
///
/// The delete set is processed first, in order, ignoring objects which are already gone or whose
/// API is not served. The apply set is applied afterwards, in order, stopping at the first error.
#[tracing::instrument(level = "debug", skip(set, client), fields(apply = set.to_apply.len(), delete = set.to_delete.len()))]
pub async fn install(set: &ManifestSet, client: &dyn ManifestClient) -> Result<()> {
    for def in set.to_delete.iter() {
        match client.delete(def).await {
            Ok(()) => tracing::debug!(object = %def.id(), "deleted"),
            Err(err) if err.is_ignorable_on_delete() => {
                tracing::debug!(object = %def.id(), error = %err, "skipping delete of absent object");
            }
            Err(err) => return Err(anyhow::Error::new(err)).with_context(|| format!("error deleting {}", def.id())),
        }
    }
    for def in set.to_apply.iter() {
        client
            .apply(def)
            .await
            .map_err(anyhow::Error::new)
            .with_context(|| format!("error applying {}", def.id()))?;
    }
    Ok(())
}
