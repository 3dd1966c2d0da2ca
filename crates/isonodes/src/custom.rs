use isocore::{KindMetadata, NodeConfig, NodeError, NodeKind, ScriptBody};
use isoruntime::classify_source;
use serde_json::{Map, Value};

/// Externally supplied node type carrying its own source text.
///
/// The source defines `execute(input_data)` or `execute(self, input_data)`
/// and only ever runs inside the workflow's interpreter.
#[derive(Debug, Clone)]
pub struct CustomNodeKind {
    node_type: String,
    source: String,
    dependencies: Vec<String>,
    config_schema: Value,
    metadata: KindMetadata,
}

impl CustomNodeKind {
    pub fn new(node_type: impl Into<String>, source: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            metadata: KindMetadata {
                name: node_type.clone(),
                description: String::new(),
                category: "custom".to_string(),
            },
            node_type,
            source: source.into(),
            dependencies: Vec::new(),
            config_schema: Value::Object(Map::new()),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_config_schema(mut self, schema: Value) -> Self {
        self.config_schema = schema;
        self
    }

    pub fn with_metadata(mut self, metadata: KindMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl NodeKind for CustomNodeKind {
    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn config_schema(&self) -> Value {
        self.config_schema.clone()
    }

    fn metadata(&self) -> KindMetadata {
        self.metadata.clone()
    }

    fn source(&self) -> Option<&str> {
        Some(&self.source)
    }

    fn render(&self, _config: &NodeConfig) -> Result<ScriptBody, NodeError> {
        if self.source.trim().is_empty() {
            return Err(NodeError::Configuration(format!(
                "custom node '{}' has no source",
                self.node_type
            )));
        }
        Ok(classify_source(&self.source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isocore::Context;

    #[test]
    fn method_and_function_sources_are_classified() {
        let method = CustomNodeKind::new("m", "def execute(self, input_data):\n    return {}\n");
        assert!(matches!(
            method.render(&NodeConfig::new()).unwrap(),
            ScriptBody::Method(_)
        ));

        let function = CustomNodeKind::new("f", "def execute(input_data):\n    return {}\n");
        assert!(matches!(
            function.render(&NodeConfig::new()).unwrap(),
            ScriptBody::Function(_)
        ));
    }

    #[test]
    fn empty_source_is_a_configuration_error() {
        let kind = CustomNodeKind::new("empty", "  \n");
        assert!(matches!(
            kind.render(&NodeConfig::new()),
            Err(NodeError::Configuration(_))
        ));
    }

    #[test]
    fn custom_nodes_have_no_preview() {
        let kind = CustomNodeKind::new("fetch", "def execute(input_data):\n    return {}\n")
            .with_dependencies(vec!["requests".to_string()]);
        assert_eq!(kind.dependencies(), vec!["requests".to_string()]);
        assert_eq!(kind.metadata().category, "custom");
        assert!(matches!(
            kind.execute(&NodeConfig::new(), &Context::new()),
            Err(NodeError::Unsupported(_))
        ));
    }
}
