//! Custom node directory loader.
//!
//! Layout: one directory per node holding a `node.json` manifest and the
//! entry source file it names.

use crate::custom::CustomNodeKind;
use isocore::KindMetadata;
use isoruntime::NodeRegistry;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

pub const MANIFEST_FILE: &str = "node.json";

#[derive(Debug, Clone, Deserialize)]
pub struct NodeManifest {
    pub node_type: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "empty_schema")]
    pub config_schema: Value,
    #[serde(default = "default_entry_file")]
    pub entry_file: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn empty_schema() -> Value {
    Value::Object(Map::new())
}

fn default_entry_file() -> String {
    "node.py".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Load one node directory
pub fn load_node_dir(dir: &Path) -> Result<CustomNodeKind, String> {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("{} has no directory name", dir.display()))?;

    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest_text = std::fs::read_to_string(&manifest_path)
        .map_err(|e| format!("{}: {}", manifest_path.display(), e))?;
    let manifest: NodeManifest = serde_json::from_str(&manifest_text)
        .map_err(|e| format!("{}: {}", manifest_path.display(), e))?;

    let entry_path = dir.join(&manifest.entry_file);
    let source = std::fs::read_to_string(&entry_path)
        .map_err(|e| format!("{}: {}", entry_path.display(), e))?;

    let node_type = manifest.node_type.unwrap_or_else(|| dir_name.clone());
    Ok(CustomNodeKind::new(node_type, source)
        .with_dependencies(manifest.dependencies)
        .with_config_schema(manifest.config_schema)
        .with_metadata(KindMetadata {
            name: manifest.name.unwrap_or(dir_name),
            description: manifest.description,
            category: manifest.category.unwrap_or_else(|| "custom".to_string()),
        }))
}

/// Load every node directory under `root`, sorted by directory name.
///
/// Entries that cannot be read are logged and skipped.
pub fn load_custom_nodes(root: &Path) -> Vec<CustomNodeKind> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("No custom nodes at {}: {}", root.display(), e);
            return Vec::new();
        }
    };

    let mut dirs: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.join(MANIFEST_FILE).is_file())
        .collect();
    dirs.sort();

    dirs.iter()
        .filter_map(|dir| match load_node_dir(dir) {
            Ok(kind) => Some(kind),
            Err(e) => {
                tracing::warn!("Skipping custom node: {}", e);
                None
            }
        })
        .collect()
}

/// Register every custom node under `root`; returns how many were loaded
pub fn register_custom_nodes(registry: &mut NodeRegistry, root: &Path) -> usize {
    let kinds = load_custom_nodes(root);
    let count = kinds.len();
    for kind in kinds {
        registry.register(Arc::new(kind));
    }
    if count > 0 {
        tracing::info!("Loaded {} custom node types from {}", count, root.display());
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use isocore::{NodeKind, ScriptBody};
    use isoruntime::NodeTypeRegistry;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_node(root: &Path, dir: &str, manifest: Value, entry: Option<(&str, &str)>) {
        let node_dir = root.join(dir);
        std::fs::create_dir_all(&node_dir).unwrap();
        std::fs::write(node_dir.join(MANIFEST_FILE), manifest.to_string()).unwrap();
        if let Some((file, source)) = entry {
            std::fs::write(node_dir.join(file), source).unwrap();
        }
    }

    #[test]
    fn manifest_defaults_come_from_the_directory() {
        let tmp = TempDir::new().unwrap();
        write_node(
            tmp.path(),
            "greeter",
            json!({}),
            Some(("node.py", "def execute(input_data):\n    return {\"hi\": 1}\n")),
        );

        let kinds = load_custom_nodes(tmp.path());
        assert_eq!(kinds.len(), 1);
        assert_eq!(kinds[0].node_type(), "greeter");
        assert_eq!(kinds[0].metadata().name, "greeter");
        assert_eq!(kinds[0].metadata().category, "custom");
    }

    #[test]
    fn manifest_fields_reach_the_registry() {
        let tmp = TempDir::new().unwrap();
        write_node(
            tmp.path(),
            "fetch_dir",
            json!({
                "node_type": "http_fetch",
                "name": "HTTP fetch",
                "dependencies": ["requests>=2.31"],
                "config_schema": {"url": {"type": "string"}},
                "entry_file": "fetch.py"
            }),
            Some(("fetch.py", "def execute(self, input_data):\n    return {\"url\": self.config[\"url\"]}\n")),
        );

        let mut registry = NodeRegistry::new();
        assert_eq!(register_custom_nodes(&mut registry, tmp.path()), 1);

        assert_eq!(registry.get_dependencies("http_fetch"), vec!["requests>=2.31"]);
        assert_eq!(
            registry.config_schema("http_fetch"),
            Some(json!({"url": {"type": "string"}}))
        );
        assert!(registry.get_source("http_fetch").unwrap().contains("self.config"));

        let kind = registry.kind("http_fetch").unwrap();
        assert!(matches!(
            kind.render(&Default::default()).unwrap(),
            ScriptBody::Method(_)
        ));
    }

    #[test]
    fn broken_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        write_node(tmp.path(), "no_source", json!({}), None);
        std::fs::create_dir_all(tmp.path().join("bad_json")).unwrap();
        std::fs::write(tmp.path().join("bad_json").join(MANIFEST_FILE), "{nope").unwrap();
        write_node(
            tmp.path(),
            "ok",
            json!({}),
            Some(("node.py", "def execute(input_data):\n    return {}\n")),
        );

        let kinds = load_custom_nodes(tmp.path());
        assert_eq!(kinds.len(), 1);
        assert_eq!(kinds[0].node_type(), "ok");
    }

    #[test]
    fn missing_root_loads_nothing() {
        let tmp = TempDir::new().unwrap();
        assert!(load_custom_nodes(&tmp.path().join("absent")).is_empty());
    }
}
