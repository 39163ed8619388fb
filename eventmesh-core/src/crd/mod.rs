//! Event mesh CRDs.
//!
//! References:
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/#specifying-a-structural-schema

mod broker;
mod channel;
mod eventmesh;
#[cfg(test)]
mod eventmesh_test;

use kube::Resource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};

pub use broker::{Broker, BrokerSpec, BROKER_CLASS_ANNOTATION};
pub use channel::{InMemoryChannel, InMemoryChannelSpec};
pub use eventmesh::{
    BrokerClass, ChannelImplementation, Condition, ConditionStatus, EnvRequirementsOverride, EventMesh, EventMeshSpec, EventMeshStatus, KafkaSpec,
    LogLevel, Overrides, ProbeOverride, ResourceRequirementsOverride, WorkloadOverride, CONDITION_DEPLOYMENTS_AVAILABLE, CONDITION_INSTALLED,
    CONDITION_READY,
};

/// A convenience trait built around the fact that all implementors
/// must have the following attributes.
pub trait RequiredMetadata {
    /// The namespace of this object.
    fn namespace(&self) -> &str;

    /// The name of this object.
    fn name(&self) -> &str;
}

impl RequiredMetadata for EventMesh {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}

impl RequiredMetadata for Broker {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}

impl RequiredMetadata for InMemoryChannel {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}

/// Schema for an opaque K8s object embedded in a spec, e.g. an `Affinity`.
pub(crate) fn opaque_object(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(preserve_unknown_fields())
}

/// Schema for a list of opaque K8s objects embedded in a spec, e.g. `[]Toleration`.
pub(crate) fn opaque_object_list(_: &mut SchemaGenerator) -> Schema {
    let mut list = SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        ..Default::default()
    };
    list.array().items = Some(Schema::Object(preserve_unknown_fields()).into());
    Schema::Object(list)
}

fn preserve_unknown_fields() -> SchemaObject {
    let mut obj = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    obj.extensions.insert("x-kubernetes-preserve-unknown-fields".into(), serde_json::Value::Bool(true));
    obj
}
