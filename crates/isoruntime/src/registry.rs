use isocore::{KindMetadata, NodeKind, WorkflowError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only view of the node-type catalog that the engine consumes.
pub trait NodeTypeRegistry: Send + Sync {
    fn get_dependencies(&self, node_type: &str) -> Vec<String>;

    fn get_source(&self, node_type: &str) -> Option<String>;

    fn config_schema(&self, node_type: &str) -> Option<Value>;
}

/// Registry of available node types.
///
/// Built once at startup and shared by handle; there is no global instance.
pub struct NodeRegistry {
    kinds: HashMap<String, Arc<dyn NodeKind>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Register a node kind, replacing any kind with the same type tag
    pub fn register(&mut self, kind: Arc<dyn NodeKind>) {
        let node_type = kind.node_type().to_string();
        if self.kinds.contains_key(&node_type) {
            tracing::info!("Replacing node type: {}", node_type);
        } else {
            tracing::debug!("Registering node type: {}", node_type);
        }
        self.kinds.insert(node_type, kind);
    }

    pub fn kind(&self, node_type: &str) -> Result<Arc<dyn NodeKind>, WorkflowError> {
        self.kinds
            .get(node_type)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownNodeType(node_type.to_string()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.kinds.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.kinds.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, node_type: &str) -> Option<KindMetadata> {
        self.kinds.get(node_type).map(|k| k.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTypeRegistry for NodeRegistry {
    fn get_dependencies(&self, node_type: &str) -> Vec<String> {
        self.kinds
            .get(node_type)
            .map(|k| k.dependencies())
            .unwrap_or_default()
    }

    fn get_source(&self, node_type: &str) -> Option<String> {
        self.kinds
            .get(node_type)
            .and_then(|k| k.source().map(str::to_string))
    }

    fn config_schema(&self, node_type: &str) -> Option<Value> {
        self.kinds.get(node_type).map(|k| k.config_schema())
    }
}
