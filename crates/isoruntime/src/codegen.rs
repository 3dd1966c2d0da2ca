//! Node-to-script code generation.
//!
//! Every node becomes a standalone Python file: the type-specific logic
//! rendered by its [`NodeKind`], the node's configuration embedded as JSON,
//! and fixed boilerplate that reads one JSON object from stdin, calls
//! `execute(input_data)` and prints the marker-framed result. The same file
//! is importable by the worker, which calls `execute` directly.

use isocore::{FlowError, NodeError, NodeKind, NodeSpec, ScriptBody};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static METHOD_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^def\s+execute\s*\(\s*self\s*[,)]").expect("valid regex")
});

const SCRIPT_TAIL: &str = r####"

def read_input():
    raw = sys.stdin.read()
    if not raw.strip():
        return {}
    return json.loads(raw)


def write_output(data):
    print("###JSON_OUTPUT###")
    print(json.dumps(data, ensure_ascii=False))
    print("###JSON_OUTPUT_END###")
    sys.stdout.flush()


def main():
    try:
        input_data = read_input()
        output_data = execute(input_data)
        write_output(output_data)
        return 0
    except Exception as e:
        print(f"node execution error: {e}", file=sys.stderr)
        write_output({"error": str(e)})
        return 1


if __name__ == "__main__":
    sys.exit(main())
"####;

const METHOD_ADAPTER: &str = r#"

_node_method = execute


class _NodeSelf:
    def __init__(self, config):
        self.config = config


def execute(input_data):
    return _node_method(_NodeSelf(NODE_CONFIG), input_data)
"#;

/// Decide how externally supplied source defines `execute`.
pub fn classify_source(source: &str) -> ScriptBody {
    if METHOD_SIGNATURE.is_match(source) {
        ScriptBody::Method(source.to_string())
    } else {
        ScriptBody::Function(source.to_string())
    }
}

/// Writes node scripts into one directory
#[derive(Debug, Clone)]
pub struct ScriptGenerator {
    output_dir: PathBuf,
}

impl ScriptGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn script_path(&self, node_id: &str) -> PathBuf {
        self.output_dir.join(format!("node_{}.py", file_stem(node_id)))
    }

    /// Render and write the script for one node
    pub fn generate(&self, node: &NodeSpec, kind: &dyn NodeKind) -> Result<PathBuf, FlowError> {
        let script = render_script(node, kind).map_err(|e| FlowError::node(&node.id, e))?;

        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.script_path(&node.id);
        std::fs::write(&path, script)?;

        tracing::debug!("Generated script for {} at {}", node.id, path.display());
        Ok(path)
    }
}

/// Generate a standalone script for `node` inside `output_dir`.
pub fn generate(
    node: &NodeSpec,
    kind: &dyn NodeKind,
    output_dir: &Path,
) -> Result<PathBuf, FlowError> {
    ScriptGenerator::new(output_dir).generate(node, kind)
}

/// Full text of a node's script
pub fn render_script(node: &NodeSpec, kind: &dyn NodeKind) -> Result<String, NodeError> {
    kind.validate_config(&node.config)?;
    let body = kind.render(&node.config)?;

    let config_json = serde_json::to_string(&node.config)
        .map_err(|e| NodeError::Configuration(e.to_string()))?;
    let config_literal = serde_json::to_string(&config_json)
        .map_err(|e| NodeError::Configuration(e.to_string()))?;

    let mut script = String::new();
    script.push_str("#!/usr/bin/env python\n# -*- coding: utf-8 -*-\n");
    script.push_str(&format!("# Node script: {}\n", single_line(&node.id)));
    script.push_str(&format!("# Type: {}\n", single_line(&node.node_type)));
    script.push_str("import json\nimport sys\n\n");
    script.push_str(&format!("NODE_CONFIG = json.loads({})\n\n\n", config_literal));
    script.push_str(&render_logic(&body));
    script.push_str(SCRIPT_TAIL);

    Ok(script)
}

fn render_logic(body: &ScriptBody) -> String {
    match body {
        ScriptBody::Inline(code) => {
            let mut out = String::from("def execute(input_data):\n    try:\n");
            for line in code.lines() {
                if line.trim().is_empty() {
                    out.push('\n');
                } else {
                    out.push_str("        ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
            out.push_str("        return output_data\n");
            out.push_str("    except Exception as e:\n");
            out.push_str("        raise RuntimeError(f\"node execution error: {e}\") from e\n");
            out
        }
        ScriptBody::Function(source) => format!("{}\n", source.trim_end()),
        ScriptBody::Method(source) => format!("{}\n{}", source.trim_end(), METHOD_ADAPTER),
    }
}

fn file_stem(node_id: &str) -> String {
    node_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use isocore::NodeConfig;

    struct Inline;

    impl NodeKind for Inline {
        fn node_type(&self) -> &str {
            "inline"
        }

        fn render(&self, _config: &NodeConfig) -> Result<ScriptBody, NodeError> {
            Ok(ScriptBody::Inline(
                "name = NODE_CONFIG.get(\"name\", \"result\")\n\noutput_data = {name: 1}".to_string(),
            ))
        }
    }

    struct Source(&'static str);

    impl NodeKind for Source {
        fn node_type(&self) -> &str {
            "custom"
        }

        fn render(&self, _config: &NodeConfig) -> Result<ScriptBody, NodeError> {
            Ok(classify_source(self.0))
        }
    }

    struct Picky;

    impl NodeKind for Picky {
        fn node_type(&self) -> &str {
            "picky"
        }

        fn render(&self, _config: &NodeConfig) -> Result<ScriptBody, NodeError> {
            Ok(ScriptBody::Inline("output_data = {}".to_string()))
        }

        fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
            if config.contains_key("required") {
                Ok(())
            } else {
                Err(NodeError::Configuration("missing 'required'".to_string()))
            }
        }
    }

    #[test]
    fn inline_body_is_wrapped_and_indented() {
        let node = NodeSpec::new("n1", "inline").with_config("name", "x");
        let script = render_script(&node, &Inline).unwrap();

        assert!(script.contains("def execute(input_data):\n    try:\n        name = NODE_CONFIG"));
        assert!(script.contains("        output_data = {name: 1}\n        return output_data\n"));
        assert!(script.contains("NODE_CONFIG = json.loads(\"{\\\"name\\\":\\\"x\\\"}\")"));
        assert!(script.contains("print(\"###JSON_OUTPUT###\")"));
        assert!(script.contains("print(\"###JSON_OUTPUT_END###\")"));
        assert!(script.contains("if __name__ == \"__main__\":"));
        assert!(script.trim_end().ends_with("sys.exit(main())"));
    }

    #[test]
    fn method_source_gets_a_stand_in_self() {
        let src = "def execute(self, input_data):\n    return {\"v\": self.config.get(\"v\")}\n";
        assert!(matches!(classify_source(src), ScriptBody::Method(_)));

        let script = render_script(&NodeSpec::new("m", "custom"), &Source(src)).unwrap();
        assert!(script.contains("_node_method = execute"));
        assert!(script.contains("self.config = config"));
        assert!(script.contains("return _node_method(_NodeSelf(NODE_CONFIG), input_data)"));
    }

    #[test]
    fn free_function_source_is_used_verbatim() {
        let src = "def execute(input_data):\n    return dict(input_data)";
        assert!(matches!(classify_source(src), ScriptBody::Function(_)));

        let script = render_script(&NodeSpec::new("f", "custom"), &Source(src)).unwrap();
        assert!(script.contains(src));
        assert!(!script.contains("_NodeSelf"));
    }

    #[test]
    fn self_named_parameter_prefix_is_not_a_method() {
        let src = "def execute(selfish_input):\n    return {}";
        assert!(matches!(classify_source(src), ScriptBody::Function(_)));
    }

    #[test]
    fn generate_writes_file_named_after_node() {
        let dir = tempfile::tempdir().unwrap();
        let node = NodeSpec::new("node/1", "inline");
        let path = generate(&node, &Inline, dir.path()).unwrap();

        assert_eq!(path, dir.path().join("node_node_1.py"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("#!/usr/bin/env python"));
    }

    #[test]
    fn invalid_config_is_reported_against_the_node() {
        let dir = tempfile::tempdir().unwrap();
        let err = generate(&NodeSpec::new("bad", "picky"), &Picky, dir.path()).unwrap_err();
        assert!(matches!(
            err,
            FlowError::Node { ref node_id, source: NodeError::Configuration(_) } if node_id == "bad"
        ));
        assert!(!dir.path().join("node_bad.py").exists());
    }
}
