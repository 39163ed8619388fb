//! A single, untyped K8s resource definition.

use anyhow::{bail, Result};
use serde_json::{Map, Value};

/// An untyped K8s resource definition, as loaded from a manifest.
#[derive(Clone, Debug, PartialEq)]
pub struct Definition(Value);

impl Definition {
    /// Create a new instance from the given JSON value.
    ///
    /// The value must be an object carrying both `apiVersion` & `kind`.
    pub fn from_value(value: Value) -> Result<Self> {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => bail!("resource definition is not an object"),
        };
        for field in ["apiVersion", "kind"] {
            if !matches!(obj.get(field), Some(Value::String(val)) if !val.is_empty()) {
                bail!("resource definition is missing {}", field);
            }
        }
        Ok(Self(value))
    }

    pub fn kind(&self) -> &str {
        self.str_at(&["kind"]).unwrap_or_default()
    }

    pub fn api_version(&self) -> &str {
        self.str_at(&["apiVersion"]).unwrap_or_default()
    }

    /// The API group of this definition, empty for the core group.
    pub fn group(&self) -> &str {
        self.api_version().rsplit_once('/').map(|(group, _)| group).unwrap_or_default()
    }

    /// The API version of this definition, without its group.
    pub fn version(&self) -> &str {
        let api_version = self.api_version();
        api_version.rsplit_once('/').map(|(_, version)| version).unwrap_or(api_version)
    }

    pub fn name(&self) -> &str {
        self.str_at(&["metadata", "name"]).unwrap_or_default()
    }

    pub fn generate_name(&self) -> &str {
        self.str_at(&["metadata", "generateName"]).unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.str_at(&["metadata", "namespace"])
    }

    /// Get the value of the given label.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.str_at(&["metadata", "labels", key])
    }

    /// Check if this definition is the object of the given kind, namespace & name.
    pub fn is(&self, kind: &str, namespace: &str, name: &str) -> bool {
        self.kind() == kind && self.namespace() == Some(namespace) && self.name() == name
    }

    /// A human readable identifier of this definition, used for logging & errors.
    pub fn id(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{} {}/{}", self.kind(), ns, self.name()),
            None => format!("{} {}", self.kind(), self.name()),
        }
    }

    /// Get the value at the given path.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(&self.0, |val, key| val.get(key))
    }

    /// Get a mutable reference to the value at the given path.
    pub fn get_mut(&mut self, path: &[&str]) -> Option<&mut Value> {
        path.iter().try_fold(&mut self.0, |val, key| val.get_mut(key))
    }

    /// Get the string at the given path.
    pub fn str_at(&self, path: &[&str]) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Get the integer at the given path.
    pub fn i64_at(&self, path: &[&str]) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    /// Set the value at the given path, creating intermediate objects as needed.
    ///
    /// Fails if an intermediate value exists but is not an object.
    pub fn set(&mut self, path: &[&str], value: Value) -> Result<()> {
        let (last, parents) = match path.split_last() {
            Some(split) => split,
            None => bail!("empty path"),
        };
        let mut current = &mut self.0;
        for key in parents {
            let parent = current;
            if parent.is_null() {
                *parent = Value::Object(Map::new());
            }
            current = match parent {
                Value::Object(obj) => obj.entry(key.to_string()).or_insert(Value::Null),
                _ => bail!("expected an object at {:?} of {}", key, path.join(".")),
            };
        }
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        match current {
            Value::Object(obj) => {
                obj.insert(last.to_string(), value);
                Ok(())
            }
            _ => bail!("expected an object at the parent of {}", path.join(".")),
        }
    }

    /// Remove the value at the given path.
    pub fn remove(&mut self, path: &[&str]) -> Option<Value> {
        let (last, parents) = path.split_last()?;
        self.get_mut(parents)?.as_object_mut()?.remove(*last)
    }

    /// Get the string map at the given path, e.g. the data of a ConfigMap.
    pub fn string_map(&self, path: &[&str]) -> Option<&Map<String, Value>> {
        self.get(path).and_then(Value::as_object)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}
