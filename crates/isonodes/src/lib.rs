//! Standard node library
//!
//! Built-in node kinds plus the loader for externally supplied ones.

mod custom;
pub mod loader;
mod sqlite;
mod variables;

pub use custom::CustomNodeKind;
pub use loader::{load_custom_nodes, register_custom_nodes};
pub use sqlite::{format_template, SqlStatementNode, SqliteConnectNode, SqliteExecuteNode};
pub use variables::{VariableAssignNode, VariableCalcNode};

use isoruntime::NodeRegistry;
use std::sync::Arc;

/// Register all built-in nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(VariableAssignNode));
    registry.register(Arc::new(VariableCalcNode));
    registry.register(Arc::new(SqliteConnectNode));
    registry.register(Arc::new(SqliteExecuteNode));
    registry.register(Arc::new(SqlStatementNode));
}

/// A registry holding every built-in node
pub fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
