use isocore::{Context, KindMetadata, NodeConfig, NodeError, NodeKind, ScriptBody};
use serde_json::{json, Map, Number, Value};

const VALUE_TYPES: [&str; 5] = ["str", "int", "float", "bool", "json"];

fn config_str<'a>(config: &'a NodeConfig, key: &str, default: &'a str) -> &'a str {
    config.get(key).and_then(Value::as_str).unwrap_or(default)
}

/// Assign a typed constant to a context variable
pub struct VariableAssignNode;

impl VariableAssignNode {
    fn convert(value: &Value, value_type: &str) -> Result<Value, NodeError> {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        match value_type {
            "int" => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::Number(n) => Ok(json!(n.as_f64().unwrap_or(0.0).trunc() as i64)),
                _ => text
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| invalid_literal("int", &text)),
            },
            "float" => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid_literal("float", &text)),
            "bool" => Ok(Value::Bool(matches!(
                text.to_lowercase().as_str(),
                "true" | "1" | "yes"
            ))),
            "json" => match value {
                Value::String(s) => serde_json::from_str(s)
                    .map_err(|e| NodeError::failed(format!("invalid JSON value: {}", e))),
                other => Ok(other.clone()),
            },
            _ => Ok(value.clone()),
        }
    }
}

fn invalid_literal(value_type: &str, text: &str) -> NodeError {
    NodeError::failed(format!("invalid literal for {}: '{}'", value_type, text))
}

impl NodeKind for VariableAssignNode {
    fn node_type(&self) -> &str {
        "variable_assign"
    }

    fn config_schema(&self) -> Value {
        json!({
            "variable_name": {"type": "string", "default": "result"},
            "value": {"type": "string", "default": ""},
            "value_type": {"type": "string", "enum": VALUE_TYPES, "default": "str"}
        })
    }

    fn metadata(&self) -> KindMetadata {
        KindMetadata {
            name: "Assign variable".to_string(),
            description: "Set a context variable to a typed constant".to_string(),
            category: "variables".to_string(),
        }
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        let value_type = config_str(config, "value_type", "str");
        if VALUE_TYPES.contains(&value_type) {
            Ok(())
        } else {
            Err(NodeError::Configuration(format!(
                "unsupported value_type '{}'",
                value_type
            )))
        }
    }

    fn render(&self, _config: &NodeConfig) -> Result<ScriptBody, NodeError> {
        Ok(ScriptBody::Inline(
            r#"var_name = NODE_CONFIG.get("variable_name", "result")
value = NODE_CONFIG.get("value", "")
value_type = NODE_CONFIG.get("value_type", "str")

if value_type == "int":
    value = int(value)
elif value_type == "float":
    value = float(value)
elif value_type == "bool":
    value = value if isinstance(value, bool) else str(value).lower() in ("true", "1", "yes")
elif value_type == "json" and isinstance(value, str):
    value = json.loads(value)

output_data = {var_name: value}"#
                .to_string(),
        ))
    }

    fn execute(&self, config: &NodeConfig, _input: &Context) -> Result<Context, NodeError> {
        self.validate_config(config)?;
        let name = config_str(config, "variable_name", "result");
        let raw = config.get("value").cloned().unwrap_or_else(|| json!(""));
        let value = Self::convert(&raw, config_str(config, "value_type", "str"))?;

        let mut output = Map::new();
        output.insert(name.to_string(), value);
        Ok(output)
    }
}

/// Evaluate an expression over the context and store the result
pub struct VariableCalcNode;

impl NodeKind for VariableCalcNode {
    fn node_type(&self) -> &str {
        "variable_calc"
    }

    fn config_schema(&self) -> Value {
        json!({
            "expression": {"type": "string", "default": "0"},
            "output_var": {"type": "string", "default": "result"}
        })
    }

    fn metadata(&self) -> KindMetadata {
        KindMetadata {
            name: "Calculate".to_string(),
            description: "Evaluate an expression with context variables in scope".to_string(),
            category: "variables".to_string(),
        }
    }

    fn render(&self, _config: &NodeConfig) -> Result<ScriptBody, NodeError> {
        Ok(ScriptBody::Inline(
            r#"expression = NODE_CONFIG.get("expression", "0")
output_var = NODE_CONFIG.get("output_var", "result")

result = eval(expression, {"__builtins__": {}}, dict(input_data))

output_data = {**input_data, output_var: result}"#
                .to_string(),
        ))
    }

    /// Previews use a JEXL evaluator; its arithmetic agrees with the
    /// generated script for the arithmetic and comparison subset.
    fn execute(&self, config: &NodeConfig, input: &Context) -> Result<Context, NodeError> {
        let expression = config_str(config, "expression", "0");
        let output_var = config_str(config, "output_var", "result");

        let scope = Value::Object(input.clone());
        let result = jexl_eval::Evaluator::new()
            .eval_in_context(expression, &scope)
            .map_err(|e| NodeError::failed(format!("cannot evaluate '{}': {}", expression, e)))?;

        let mut output = input.clone();
        output.insert(output_var.to_string(), integral(result));
        Ok(output)
    }
}

/// JEXL works in floats; whole results are reported as integers
fn integral(value: Value) -> Value {
    match value.as_f64() {
        Some(f) if value.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            json!(f as i64)
        }
        _ => value,
    }
}
