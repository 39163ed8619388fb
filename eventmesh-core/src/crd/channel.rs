//! InMemoryChannel CRD, owned by the eventing core.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub type InMemoryChannel = InMemoryChannelCRD;

/// CRD spec for the InMemoryChannel resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    struct = "InMemoryChannelCRD",
    group = "messaging.knative.dev",
    version = "v1",
    kind = "InMemoryChannel",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct InMemoryChannelSpec {
    /// Delivery options of the channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "super::opaque_object")]
    pub delivery: Option<serde_json::Value>,
}
