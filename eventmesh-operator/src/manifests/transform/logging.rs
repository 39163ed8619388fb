use anyhow::{anyhow, bail, Context, Result};
use eventmesh_core::crd::LogLevel;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::manifests::transform::{is_config_map, set_data};
use crate::manifests::{Definition, Transformer};

/// The logging ConfigMap of the eventing core.
const CORE_LOGGING_CONFIG_MAP: &str = "config-logging";
/// The key of the zap logger config in the core logging ConfigMap.
const ZAP_CONFIG_KEY: &str = "zap-logger-config";
/// The logging ConfigMap of the Kafka data plane.
const KAFKA_LOGGING_CONFIG_MAP: &str = "kafka-config-logging";
/// The key of the logback config in the Kafka logging ConfigMap.
const LOGBACK_CONFIG_KEY: &str = "config.xml";

lazy_static! {
    static ref LOGBACK_ROOT_LEVEL_RE: Regex = Regex::new(r#"(<root\s+level=")[^"]+(")"#).unwrap();
}

/// Set the log level of all eventing core components.
///
/// Updates every `loglevel.*` key of the core logging ConfigMap, as well as the level of its zap
/// logger config.
pub fn eventing_core_logging(namespace: &str, level: LogLevel) -> Transformer {
    let namespace = namespace.to_string();
    Transformer::new(format!("eventing core log level {}", level), move |def: &mut Definition| {
        if !is_config_map(def, &namespace, CORE_LOGGING_CONFIG_MAP) {
            return Ok(());
        }
        let zap_level = level.zap_level();
        let keys: Vec<String> = def
            .string_map(&["data"])
            .map(|data| data.keys().filter(|key| key.starts_with("loglevel.")).cloned().collect())
            .unwrap_or_default();
        for key in keys {
            set_data(def, &key, zap_level)?;
        }

        let zap_config = match def.str_at(&["data", ZAP_CONFIG_KEY]) {
            Some(raw) if !raw.trim().is_empty() => raw.to_string(),
            _ => return Ok(()),
        };
        let mut zap_config: Value = serde_json::from_str(&zap_config).context("error parsing zap logger config")?;
        match zap_config.as_object_mut() {
            Some(obj) => obj.insert("level".into(), Value::String(zap_level.into())),
            None => bail!("zap logger config is not an object"),
        };
        let zap_config = serde_json::to_string_pretty(&zap_config).context("error serializing zap logger config")?;
        set_data(def, ZAP_CONFIG_KEY, zap_config)
    })
}

/// Set the root log level of the Kafka data plane's logback config.
pub fn kafka_logging(namespace: &str, level: LogLevel) -> Transformer {
    let namespace = namespace.to_string();
    Transformer::new(format!("kafka log level {}", level), move |def: &mut Definition| {
        if !is_config_map(def, &namespace, KAFKA_LOGGING_CONFIG_MAP) {
            return Ok(());
        }
        let config = def
            .str_at(&["data", LOGBACK_CONFIG_KEY])
            .ok_or_else(|| anyhow!("{} not found in {} configmap", LOGBACK_CONFIG_KEY, KAFKA_LOGGING_CONFIG_MAP))?;
        if !LOGBACK_ROOT_LEVEL_RE.is_match(config) {
            bail!(r#"could not find <root level="..."> in logging configuration"#);
        }
        let updated = LOGBACK_ROOT_LEVEL_RE
            .replace_all(config, format!("${{1}}{}${{2}}", level.logback_level()).as_str())
            .into_owned();
        set_data(def, LOGBACK_CONFIG_KEY, updated)
    })
}
