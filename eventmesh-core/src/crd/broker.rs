//! Broker CRD, owned by the eventing core.
//!
//! Only the subset of the resource needed to classify brokers is modelled here.

use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub type Broker = BrokerCRD;

/// The annotation holding the class of a broker.
pub const BROKER_CLASS_ANNOTATION: &str = "eventing.knative.dev/broker.class";

/// CRD spec for the Broker resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(struct = "BrokerCRD", group = "eventing.knative.dev", version = "v1", kind = "Broker", namespaced, derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct BrokerSpec {
    /// A reference to the broker's configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "super::opaque_object")]
    pub config: Option<serde_json::Value>,
}

impl BrokerCRD {
    /// The class of this broker, if annotated.
    pub fn class(&self) -> Option<&str> {
        self.meta().annotations.as_ref().and_then(|a| a.get(BROKER_CLASS_ANNOTATION)).map(String::as_str)
    }
}
