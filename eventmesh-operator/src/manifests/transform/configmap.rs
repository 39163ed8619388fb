use std::collections::BTreeMap;

use crate::manifests::transform::{is_config_map, set_data};
use crate::manifests::{Definition, Transformer};

/// Set one data key of the named ConfigMap.
pub fn config_map_value(namespace: &str, name: &str, key: &str, value: impl Into<String>) -> Transformer {
    let mut values = BTreeMap::new();
    values.insert(key.to_string(), value.into());
    config_map_values(namespace, name, values)
}

/// Set the given data keys of the named ConfigMap.
pub fn config_map_values(namespace: &str, name: &str, values: BTreeMap<String, String>) -> Transformer {
    let (namespace, name) = (namespace.to_string(), name.to_string());
    Transformer::new(format!("configmap {}/{} values", namespace, name), move |def: &mut Definition| {
        if !is_config_map(def, &namespace, &name) {
            return Ok(());
        }
        for (key, val) in values.iter() {
            set_data(def, key, val.as_str())?;
        }
        Ok(())
    })
}

/// Apply user provided data overrides to any ConfigMap.
///
/// Overrides are keyed by ConfigMap name, where the `config-` prefix of a name may be omitted.
pub fn config_map_override(overrides: BTreeMap<String, BTreeMap<String, String>>) -> Transformer {
    Transformer::new("configmap overrides", move |def: &mut Definition| {
        if def.kind() != "ConfigMap" {
            return Ok(());
        }
        let name = def.name().to_string();
        let data = overrides
            .get(&name)
            .or_else(|| name.strip_prefix("config-").and_then(|short| overrides.get(short)));
        if let Some(data) = data {
            for (key, val) in data.iter() {
                if def.str_at(&["data", key.as_str()]) == Some(val.as_str()) {
                    continue;
                }
                set_data(def, key, val.as_str())?;
            }
        }
        Ok(())
    })
}
