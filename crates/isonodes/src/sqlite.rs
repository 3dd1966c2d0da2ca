//! SQLite nodes and SQL templating.
//!
//! Connection details travel through the context as plain data; each
//! executing script opens and closes its own connection.

use isocore::{Context, KindMetadata, NodeConfig, NodeError, NodeKind, ScriptBody};
use regex::{Captures, Regex};
use serde_json::{json, Value};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("valid regex"));

fn config_str<'a>(config: &'a NodeConfig, key: &str, default: &'a str) -> &'a str {
    config.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn database_metadata(name: &str, description: &str) -> KindMetadata {
    KindMetadata {
        name: name.to_string(),
        description: description.to_string(),
        category: "database".to_string(),
    }
}

/// Open (creating if needed) a SQLite database and publish its details
pub struct SqliteConnectNode;

impl NodeKind for SqliteConnectNode {
    fn node_type(&self) -> &str {
        "sqlite_connect"
    }

    fn config_schema(&self) -> Value {
        json!({
            "db_path": {"type": "string", "default": ":memory:"},
            "connection_name": {"type": "string", "default": "db_conn"}
        })
    }

    fn metadata(&self) -> KindMetadata {
        database_metadata("SQLite connect", "Open a SQLite database file")
    }

    fn render(&self, _config: &NodeConfig) -> Result<ScriptBody, NodeError> {
        Ok(ScriptBody::Inline(
            r#"import sqlite3

db_path = NODE_CONFIG.get("db_path", ":memory:")
conn_name = NODE_CONFIG.get("connection_name", "db_conn")

conn = sqlite3.connect(db_path)
conn.close()

output_data = {
    **input_data,
    conn_name: {"type": "sqlite", "db_path": db_path, "connected": True},
}"#
            .to_string(),
        ))
    }

    fn execute(&self, config: &NodeConfig, input: &Context) -> Result<Context, NodeError> {
        let db_path = config_str(config, "db_path", ":memory:");
        let conn_name = config_str(config, "connection_name", "db_conn");

        let mut output = input.clone();
        output.insert(
            conn_name.to_string(),
            json!({"type": "sqlite", "db_path": db_path, "connected": true}),
        );
        Ok(output)
    }
}

/// Run the SQL held in a context variable against a published connection
pub struct SqliteExecuteNode;

impl NodeKind for SqliteExecuteNode {
    fn node_type(&self) -> &str {
        "sqlite_execute"
    }

    fn config_schema(&self) -> Value {
        json!({
            "connection_name": {"type": "string", "default": "db_conn"},
            "sql_var": {"type": "string", "default": "sql"},
            "output_var": {"type": "string", "default": "query_result"}
        })
    }

    fn metadata(&self) -> KindMetadata {
        database_metadata("SQLite execute", "Execute a SQL statement from the context")
    }

    fn render(&self, _config: &NodeConfig) -> Result<ScriptBody, NodeError> {
        Ok(ScriptBody::Inline(
            r#"import sqlite3

conn_name = NODE_CONFIG.get("connection_name", "db_conn")
sql_var = NODE_CONFIG.get("sql_var", "sql")
output_var = NODE_CONFIG.get("output_var", "query_result")

conn_info = input_data.get(conn_name) or {}
sql = input_data.get(sql_var, "")
if not sql:
    raise ValueError("SQL statement is empty")

conn = sqlite3.connect(conn_info.get("db_path", ":memory:"))
cursor = conn.cursor()
try:
    cursor.execute(sql)
    if sql.strip().upper().startswith("SELECT"):
        columns = [desc[0] for desc in cursor.description]
        result = [dict(zip(columns, row)) for row in cursor.fetchall()]
    else:
        conn.commit()
        result = {"affected_rows": cursor.rowcount}
finally:
    cursor.close()
    conn.close()

output_data = {**input_data, output_var: result}"#
                .to_string(),
        ))
    }

    /// Previews never touch a database; the result list is always empty.
    fn execute(&self, config: &NodeConfig, input: &Context) -> Result<Context, NodeError> {
        let output_var = config_str(config, "output_var", "query_result");
        let mut output = input.clone();
        output.insert(output_var.to_string(), json!([]));
        Ok(output)
    }
}

/// Render a SQL template with context variables
pub struct SqlStatementNode;

impl NodeKind for SqlStatementNode {
    fn node_type(&self) -> &str {
        "sql_statement"
    }

    fn config_schema(&self) -> Value {
        json!({
            "sql": {"type": "string", "default": ""},
            "output_var": {"type": "string", "default": "sql"}
        })
    }

    fn metadata(&self) -> KindMetadata {
        database_metadata("SQL statement", "Fill a SQL template with context variables")
    }

    fn render(&self, _config: &NodeConfig) -> Result<ScriptBody, NodeError> {
        Ok(ScriptBody::Inline(
            r#"sql_template = NODE_CONFIG.get("sql", "")
output_var = NODE_CONFIG.get("output_var", "sql")

sql = sql_template.format(**input_data)

output_data = {**input_data, output_var: sql}"#
                .to_string(),
        ))
    }

    fn execute(&self, config: &NodeConfig, input: &Context) -> Result<Context, NodeError> {
        let template = config_str(config, "sql", "");
        let output_var = config_str(config, "output_var", "sql");

        let sql = format_template(template, input)?;
        let mut output = input.clone();
        output.insert(output_var.to_string(), Value::String(sql));
        Ok(output)
    }
}

/// Substitute `{name}` placeholders from `values`; `{{` and `}}` are literal
/// braces. Strings are inserted bare, other values as JSON text.
pub fn format_template(template: &str, values: &Context) -> Result<String, NodeError> {
    let mut missing = None;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        match caps.get(1) {
            None if &caps[0] == "{{" => "{".to_string(),
            None => "}".to_string(),
            Some(name) => match values.get(name.as_str().trim()) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => {
                    missing.get_or_insert_with(|| name.as_str().to_string());
                    String::new()
                }
            },
        }
    });

    match missing {
        Some(name) => Err(NodeError::failed(format!("missing template variable '{}'", name))),
        None => Ok(rendered.into_owned()),
    }
}
