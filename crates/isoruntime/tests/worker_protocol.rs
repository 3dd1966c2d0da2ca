// crates/isoruntime/tests/worker_protocol.rs
//
// Drives the real worker runner under python3. Tests return early when no
// interpreter is installed.

use isocore::{Context, NodeConfig, NodeError, NodeKind, NodeSpec, ScriptBody, TransportError};
use isoruntime::protocol::WorkerCommand;
use isoruntime::worker::install_runner;
use isoruntime::{
    NodeRunner, OneShotRunner, ScriptGenerator, Worker, WorkerState, WorkerTimeouts,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn python() -> Option<PathBuf> {
    let available = std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !available {
        eprintln!("python3 not found, skipping");
    }
    available.then(|| PathBuf::from("python3"))
}

/// Kind whose body is given verbatim
struct Body(&'static str);

impl NodeKind for Body {
    fn node_type(&self) -> &str {
        "body"
    }

    fn render(&self, _config: &NodeConfig) -> Result<ScriptBody, NodeError> {
        Ok(ScriptBody::Inline(self.0.to_string()))
    }
}

fn script(dir: &Path, id: &str, body: &'static str) -> PathBuf {
    let node = NodeSpec::new(id, "body").with_config("factor", 3);
    ScriptGenerator::new(dir.join("scripts"))
        .generate(&node, &Body(body))
        .unwrap()
}

async fn start(python: &Path, dir: &Path) -> Worker {
    let runner = install_runner(dir).await.unwrap();
    Worker::start(python, &runner, WorkerTimeouts::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn worker_reply_matches_one_shot_output() {
    let Some(python) = python() else { return };
    let tmp = TempDir::new().unwrap();
    let path = script(
        tmp.path(),
        "scale",
        "print(\"chatter before the result\")\noutput_data = {\"scaled\": input_data.get(\"x\", 0) * NODE_CONFIG[\"factor\"], \"seen\": sorted(input_data)}",
    );

    let mut worker = start(&python, tmp.path()).await;
    assert_eq!(worker.state(), WorkerState::Ready);

    let reply = worker
        .request(&WorkerCommand::RunNode {
            script_path: path.clone(),
            input_data: Context::new(),
        })
        .await
        .unwrap();
    assert!(reply.success);
    assert_eq!(reply.data, Some(json!({"scaled": 0, "seen": []})));

    let mut input = Context::new();
    input.insert("x".to_string(), json!(7));
    let from_worker = worker.run_node(&path, &input).await.unwrap();
    worker.shutdown().await;

    let mut one_shot = OneShotRunner::new(&python, Duration::from_secs(30));
    let from_process = one_shot.run_node(&path, &input).await.unwrap();

    assert_eq!(from_worker, from_process);
    assert_eq!(from_worker.get("scaled"), Some(&json!(21)));
}

#[tokio::test]
async fn output_without_trailing_newline_still_frames() {
    let Some(python) = python() else { return };
    let tmp = TempDir::new().unwrap();
    let path = script(
        tmp.path(),
        "progress",
        "print(\"progress\", end=\"\")\noutput_data = {\"ok\": True}",
    );

    let runner = install_runner(tmp.path()).await.unwrap();
    let timeouts = WorkerTimeouts {
        node: Duration::from_secs(5),
        ..WorkerTimeouts::default()
    };
    let mut worker = Worker::start(&python, &runner, timeouts).await.unwrap();
    let from_worker = worker.run_node(&path, &Context::new()).await.unwrap();
    assert_eq!(worker.state(), WorkerState::Ready);
    worker.shutdown().await;

    let mut one_shot = OneShotRunner::new(&python, Duration::from_secs(30));
    let from_process = one_shot.run_node(&path, &Context::new()).await.unwrap();

    assert_eq!(from_worker.get("ok"), Some(&json!(true)));
    assert_eq!(from_worker, from_process);
}

#[tokio::test]
async fn malformed_commands_keep_the_worker_alive() {
    let Some(python) = python() else { return };
    let tmp = TempDir::new().unwrap();
    let path = script(tmp.path(), "ok", "output_data = {\"ok\": True}");
    let mut worker = start(&python, tmp.path()).await;

    let reply = worker.send_line("{not json").await.unwrap();
    assert!(!reply.success);
    assert_eq!(reply.error.as_deref(), Some("Invalid JSON input"));

    let reply = worker.send_line(r#"{"type": "reboot"}"#).await.unwrap();
    assert!(!reply.success);
    assert!(reply.error.unwrap().contains("reboot"));

    assert_eq!(worker.state(), WorkerState::Ready);
    let output = worker.run_node(&path, &Context::new()).await.unwrap();
    assert_eq!(output.get("ok"), Some(&json!(true)));

    worker.shutdown().await;
}

#[tokio::test]
async fn node_exceptions_carry_message_and_traceback() {
    let Some(python) = python() else { return };
    let tmp = TempDir::new().unwrap();
    let path = script(tmp.path(), "boom", "raise ValueError(\"SQL statement is empty\")");

    let mut worker = start(&python, tmp.path()).await;
    let err = worker.run_node(&path, &Context::new()).await.unwrap_err();
    match err {
        NodeError::ExecutionFailed { message, traceback } => {
            assert!(message.contains("SQL statement is empty"));
            assert!(traceback.unwrap().contains("ValueError"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // the failure is scoped to the node; the worker keeps serving
    assert_eq!(worker.state(), WorkerState::Ready);
    worker.shutdown().await;

    let mut one_shot = OneShotRunner::new(&python, Duration::from_secs(30));
    let err = one_shot.run_node(&path, &Context::new()).await.unwrap_err();
    assert!(err.to_string().contains("SQL statement is empty"));
}

#[tokio::test]
async fn missing_return_value_is_an_empty_result() {
    let Some(python) = python() else { return };
    let tmp = TempDir::new().unwrap();
    let path = script(tmp.path(), "none", "output_data = None");

    let mut worker = start(&python, tmp.path()).await;
    assert!(worker.run_node(&path, &Context::new()).await.unwrap().is_empty());
    worker.shutdown().await;

    let mut one_shot = OneShotRunner::new(&python, Duration::from_secs(30));
    assert!(one_shot.run_node(&path, &Context::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn slow_node_times_out_and_stops_the_worker() {
    let Some(python) = python() else { return };
    let tmp = TempDir::new().unwrap();
    let path = script(
        tmp.path(),
        "slow",
        "import time\ntime.sleep(10)\noutput_data = {}",
    );

    let runner = install_runner(tmp.path()).await.unwrap();
    let timeouts = WorkerTimeouts {
        node: Duration::from_millis(500),
        ..WorkerTimeouts::default()
    };
    let mut worker = Worker::start(&python, &runner, timeouts).await.unwrap();

    let err = worker.run_node(&path, &Context::new()).await.unwrap_err();
    assert!(matches!(
        err,
        NodeError::Transport(TransportError::ReadTimeout { .. })
    ));
    assert_eq!(worker.state(), WorkerState::Stopped);
    worker.shutdown().await;
}
