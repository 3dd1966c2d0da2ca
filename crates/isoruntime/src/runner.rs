use crate::protocol::extract_payload;
use async_trait::async_trait;
use isocore::{Context, NodeError, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// How node scripts were invoked for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerMode {
    Worker,
    OneShot,
}

/// Executes generated node scripts in an interpreter process
#[async_trait]
pub trait NodeRunner: Send {
    fn mode(&self) -> RunnerMode;

    /// Run one script's `execute` against `input` and return its output map
    async fn run_node(&mut self, script_path: &Path, input: &Context) -> Result<Context, NodeError>;

    /// Release the underlying process(es)
    async fn shutdown(self: Box<Self>);
}

/// Turn a node's returned value into a context map.
///
/// `None` and `null` are an empty result; anything that is not an object is
/// rejected since it cannot be merged.
pub fn into_output(data: Option<Value>) -> Result<Context, NodeError> {
    match data {
        None | Some(Value::Null) => Ok(Context::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(NodeError::InvalidOutput(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Spawns a fresh interpreter for every node.
///
/// Used when a persistent worker cannot be started, or when configured.
#[derive(Debug, Clone)]
pub struct OneShotRunner {
    interpreter: PathBuf,
    timeout: Duration,
}

impl OneShotRunner {
    pub fn new(interpreter: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    async fn invoke(&self, script_path: &Path, input: &Context) -> Result<Context, NodeError> {
        let input_json = serde_json::to_vec(input)
            .map_err(|e| NodeError::Configuration(format!("unserializable input: {}", e)))?;

        let mut child = Command::new(&self.interpreter)
            .arg(script_path)
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {}", self.interpreter.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A script may exit without reading its input; its output still counts.
            if let Err(e) = stdin.write_all(&input_json).await {
                tracing::debug!("Failed to write stdin of {}: {}", script_path.display(), e);
            }
            drop(stdin);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| TransportError::ReadTimeout {
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| TransportError::BrokenPipe(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            // a missing end marker reads as an empty result
            let payload = extract_payload(&stdout)?;
            return into_output(payload);
        }

        let framed_error = extract_payload(&stdout)
            .ok()
            .flatten()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string));
        let message = framed_error
            .or_else(|| (!stderr.is_empty()).then(|| stderr.clone()))
            .unwrap_or_else(|| format!("script exited with {}", output.status));

        Err(NodeError::ExecutionFailed {
            message,
            traceback: (!stderr.is_empty()).then_some(stderr),
        })
    }
}

#[async_trait]
impl NodeRunner for OneShotRunner {
    fn mode(&self) -> RunnerMode {
        RunnerMode::OneShot
    }

    async fn run_node(&mut self, script_path: &Path, input: &Context) -> Result<Context, NodeError> {
        self.invoke(script_path, input).await
    }

    async fn shutdown(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_and_missing_output_are_empty() {
        assert!(into_output(None).unwrap().is_empty());
        assert!(into_output(Some(Value::Null)).unwrap().is_empty());
    }

    #[test]
    fn object_output_is_kept() {
        let out = into_output(Some(json!({"a": 1}))).unwrap();
        assert_eq!(out.get("a"), Some(&json!(1)));
    }

    #[test]
    fn non_object_output_is_rejected() {
        assert!(matches!(
            into_output(Some(json!([1, 2]))),
            Err(NodeError::InvalidOutput(_))
        ));
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_spawn_error() {
        let mut runner = OneShotRunner::new("/nonexistent/interpreter", Duration::from_secs(5));
        let err = runner
            .run_node(Path::new("/nonexistent/node.py"), &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Transport(TransportError::Spawn(_))));
    }
}
