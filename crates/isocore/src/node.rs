use crate::{Context, NodeError};
use serde_json::{Map, Value};

/// Type-specific configuration attached to a node instance
pub type NodeConfig = Map<String, Value>;

/// Core trait that every node type implements.
///
/// A kind never runs node logic inside the engine for a real workflow run: it
/// renders the logic into a script body that the code generator wraps and the
/// isolated interpreter executes.
pub trait NodeKind: Send + Sync {
    /// Type tag (e.g., "variable_assign", "sqlite_execute")
    fn node_type(&self) -> &str;

    /// Requirement strings the isolated environment needs for this type
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Description of the configuration keys this type reads
    fn config_schema(&self) -> Value {
        Value::Object(Map::new())
    }

    fn metadata(&self) -> KindMetadata {
        KindMetadata::default()
    }

    /// Raw source text for externally supplied types
    fn source(&self) -> Option<&str> {
        None
    }

    /// Render the logic that the generated script will run.
    fn render(&self, config: &NodeConfig) -> Result<ScriptBody, NodeError>;

    /// Evaluate the node in-process. Only trusted built-in types implement
    /// this; it backs previews, never real runs.
    fn execute(&self, _config: &NodeConfig, _input: &Context) -> Result<Context, NodeError> {
        Err(NodeError::Unsupported(format!(
            "'{}' can only run inside an isolated interpreter",
            self.node_type()
        )))
    }

    /// Optional: Validate configuration before any script is generated
    fn validate_config(&self, _config: &NodeConfig) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Python source produced by [`NodeKind::render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptBody {
    /// Statements placed inside the generated `execute(input_data)`; they
    /// must assign `output_data`.
    Inline(String),

    /// Module-level source that defines `execute(input_data)` itself.
    Function(String),

    /// Module-level source that defines `execute(self, input_data)`; the
    /// generator supplies a stand-in `self` exposing `config`.
    Method(String),
}

/// Display information about a node type
#[derive(Debug, Clone)]
pub struct KindMetadata {
    pub name: String,
    pub description: String,
    pub category: String,
}

impl Default for KindMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            category: "general".to_string(),
        }
    }
}
