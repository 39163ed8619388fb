//! Manifest loading.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::manifests::Definition;

/// A directory of component manifests, laid out as `<root>/<component>/<file>`.
#[derive(Clone, Debug)]
pub struct ManifestSource {
    root: PathBuf,
}

impl ManifestSource {
    /// Create a new instance.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Load all definitions of the given files of a component, in file order.
    pub async fn load(&self, component: &str, files: &[&str]) -> Result<Vec<Definition>> {
        let mut defs = vec![];
        for file in files {
            let path = self.root.join(component).join(file);
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("error reading manifest {:?}", &path))?;
            defs.extend(parse_documents(&content).with_context(|| format!("error parsing manifest {:?}", &path))?);
        }
        Ok(defs)
    }
}

/// Parse the given multi-document YAML into definitions.
///
/// Document separators may carry trailing comments. Empty documents are skipped, as are documents
/// holding a `List`, whose items are flattened.
pub fn parse_documents(content: &str) -> Result<Vec<Definition>> {
    let mut defs = vec![];
    for (idx, doc) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_json::Value::deserialize(doc).with_context(|| format!("error parsing document {}", idx))?;
        match value {
            serde_json::Value::Null => continue,
            serde_json::Value::Object(ref obj) if is_list(obj) => {
                let items = obj.get("items").and_then(|items| items.as_array()).cloned().unwrap_or_default();
                for item in items {
                    defs.push(Definition::from_value(item).with_context(|| format!("invalid list item in document {}", idx))?);
                }
            }
            value => defs.push(Definition::from_value(value).with_context(|| format!("invalid document {}", idx))?),
        }
    }
    Ok(defs)
}

/// Parse a hand-authored manifest snippet.
///
/// # Panics
/// Panics if the snippet does not parse. Snippets are authored alongside the code using them, so
/// a failure here is a programming error rather than a runtime condition.
pub fn inline(snippet: &str) -> Vec<Definition> {
    match parse_documents(snippet) {
        Ok(defs) => defs,
        Err(err) => panic!("error parsing inline manifest: {:?}", err),
    }
}

fn is_list(obj: &serde_json::Map<String, serde_json::Value>) -> bool {
    matches!(obj.get("kind").and_then(|kind| kind.as_str()), Some(kind) if kind.ends_with("List")) && obj.contains_key("items")
}
