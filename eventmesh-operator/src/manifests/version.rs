//! Component versions & upgrade detection.

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use eventmesh_core::VERSION_LABEL;
use lazy_static::lazy_static;
use regex::Regex;

use crate::cluster::DeploymentLister;
use crate::error::NonRecoverableError;
use crate::manifests::Definition;

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?$").unwrap();
}

/// A semantic version, ordered by major, minor & patch. Pre-release & build metadata are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// This version with its patch component masked out.
    pub fn without_patch(self) -> Self {
        Self { patch: 0, ..self }
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(val: &str) -> Result<Self> {
        let caps = VERSION_RE.captures(val).ok_or_else(|| anyhow!("invalid version {:?}", val))?;
        let part = |idx: usize| -> Result<u64> {
            caps.get(idx)
                .map(|m| m.as_str())
                .unwrap_or_default()
                .parse()
                .with_context(|| format!("invalid version {:?}", val))
        };
        Ok(Self {
            major: part(1)?,
            minor: part(2)?,
            patch: part(3)?,
        })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Detect if applying the given definitions upgrades the installed component.
///
/// It is an upgrade iff the installed version is lower than the version of the definitions,
/// ignoring patch versions. If no Deployment of the definitions exists in the cluster yet, this
/// is a first install and not an upgrade.
pub fn detect_upgrade(defs: &[Definition], deployments: &dyn DeploymentLister, default_namespace: &str) -> Result<bool> {
    match versions(defs, deployments, default_namespace)? {
        Some((manifest, installed)) => Ok(installed.without_patch() < manifest.without_patch()),
        None => Ok(false),
    }
}

/// Get the manifest & installed versions of the component of the given definitions.
///
/// Deployments are walked from the last one to the first, and the first Deployment which exists
/// in the cluster provides both versions. Returns `None` if no Deployment exists in the cluster.
pub fn versions(defs: &[Definition], deployments: &dyn DeploymentLister, default_namespace: &str) -> Result<Option<(Version, Version)>> {
    let manifest_deployments: Vec<_> = defs.iter().filter(|def| def.kind() == "Deployment").collect();
    if manifest_deployments.is_empty() {
        return Err(NonRecoverableError("could not find any deployments in manifests".into()).into());
    }

    for def in manifest_deployments.into_iter().rev() {
        let namespace = def.namespace().unwrap_or(default_namespace);
        let live = match deployments
            .get(namespace, def.name())
            .with_context(|| format!("error getting deployment {}/{}", namespace, def.name()))?
        {
            Some(live) => live,
            None => {
                tracing::debug!(deployment = def.name(), "deployment not installed, trying previous deployment");
                continue;
            }
        };

        let installed = live
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(VERSION_LABEL))
            .ok_or_else(|| anyhow!("label {} not found on deployment {}/{}", VERSION_LABEL, namespace, def.name()))?;
        let installed: Version = installed
            .parse()
            .with_context(|| format!("error parsing installed version of deployment {}/{}", namespace, def.name()))?;
        let manifest: Version = match def.label(VERSION_LABEL) {
            Some(version) => version.parse().with_context(|| format!("error parsing manifest version of {}", def.id()))?,
            None => bail!("label {} not found on {}", VERSION_LABEL, def.id()),
        };

        tracing::debug!(%installed, %manifest, deployment = def.name(), "found installed component version");
        return Ok(Some((manifest, installed)));
    }

    Ok(None)
}
