//! Persistent worker process.
//!
//! One interpreter per run executes every node script on command. The
//! engine writes newline-delimited JSON commands to the worker's stdin and
//! reads marker-framed replies from its stdout; both sides block on a read,
//! and every read on this side is bounded by a timeout.

use crate::protocol::{FrameDecoder, WorkerCommand, WorkerReply, READY};
use crate::runner::{into_output, NodeRunner, RunnerMode};
use async_trait::async_trait;
use isocore::{Context, NodeError, TransportError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// File name the runner script is installed under
pub const RUNNER_FILE_NAME: &str = "workflow_runner.py";

const RUNNER_SOURCE: &str = include_str!("worker_runner.py");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Starting,
    Ready,
    Busy,
    Exiting,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerTimeouts {
    pub startup: Duration,
    pub node: Duration,
    pub exit: Duration,
}

impl Default for WorkerTimeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_secs(10),
            node: Duration::from_secs(300),
            exit: Duration::from_millis(1000),
        }
    }
}

/// Write the worker's runner script into `dir`
pub async fn install_runner(dir: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(RUNNER_FILE_NAME);
    tokio::fs::write(&path, RUNNER_SOURCE).await?;
    Ok(path)
}

pub struct Worker {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    state: WorkerState,
    timeouts: WorkerTimeouts,
}

impl Worker {
    /// Spawn the runner and wait for its READY line.
    pub async fn start(
        interpreter: &Path,
        runner_script: &Path,
        timeouts: WorkerTimeouts,
    ) -> Result<Self, TransportError> {
        let mut child = Command::new(interpreter)
            .arg("-u")
            .arg(runner_script)
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {}", interpreter.display(), e)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("worker stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "isoflow::worker", "{}", line);
                }
            });
        }

        let mut worker = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            state: WorkerState::Starting,
            timeouts,
        };

        let ready = tokio::time::timeout(timeouts.startup, worker.wait_ready()).await;
        match ready {
            Ok(Ok(())) => {
                worker.state = WorkerState::Ready;
                tracing::info!("Worker ready (pid {:?})", worker.child.id());
                Ok(worker)
            }
            Ok(Err(e)) => {
                worker.kill().await;
                Err(e)
            }
            Err(_) => {
                worker.kill().await;
                Err(TransportError::StartupTimeout {
                    seconds: timeouts.startup.as_secs(),
                })
            }
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    async fn wait_ready(&mut self) -> Result<(), TransportError> {
        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) if line.trim() == READY => return Ok(()),
                Ok(Some(line)) => tracing::debug!("Worker output before READY: {}", line),
                Ok(None) => return Err(TransportError::UnexpectedExit),
                Err(e) => return Err(TransportError::BrokenPipe(e.to_string())),
            }
        }
    }

    /// Send a command and wait for its framed reply
    pub async fn request(&mut self, command: &WorkerCommand) -> Result<WorkerReply, TransportError> {
        let line = command
            .to_line()
            .map_err(|e| TransportError::MalformedReply(format!("unserializable command: {}", e)))?;
        self.send_line(&line).await
    }

    /// Send one raw line and wait for its framed reply
    pub async fn send_line(&mut self, line: &str) -> Result<WorkerReply, TransportError> {
        if self.state != WorkerState::Ready {
            return Err(TransportError::BrokenPipe(format!(
                "worker is not ready ({:?})",
                self.state
            )));
        }
        self.state = WorkerState::Busy;

        if let Err(e) = self.write_line(line).await {
            self.state = WorkerState::Stopped;
            return Err(e);
        }

        let frame = tokio::time::timeout(self.timeouts.node, self.read_frame()).await;
        let reply = match frame {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.state = WorkerState::Stopped;
                return Err(e);
            }
            Err(_) => {
                self.kill().await;
                return Err(TransportError::ReadTimeout {
                    seconds: self.timeouts.node.as_secs(),
                });
            }
        };

        self.state = WorkerState::Ready;
        serde_json::from_value(reply).map_err(|e| TransportError::MalformedReply(e.to_string()))
    }

    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TransportError::BrokenPipe("worker stdin closed".to_string()))?;
        let mut buf = line.to_string();
        if !buf.ends_with('\n') {
            buf.push('\n');
        }
        stdin
            .write_all(buf.as_bytes())
            .await
            .map_err(|e| TransportError::BrokenPipe(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| TransportError::BrokenPipe(e.to_string()))
    }

    async fn read_frame(&mut self) -> Result<serde_json::Value, TransportError> {
        let mut decoder = FrameDecoder::new();
        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) => {
                    if let Some(result) = decoder.push_line(&line) {
                        return result;
                    }
                }
                Ok(None) => return Err(TransportError::UnexpectedExit),
                Err(e) => return Err(TransportError::BrokenPipe(e.to_string())),
            }
        }
    }

    /// Ask the worker to exit, then make sure it is gone.
    pub async fn shutdown(mut self) {
        if matches!(self.state, WorkerState::Ready | WorkerState::Busy) {
            self.state = WorkerState::Exiting;
            if let Ok(line) = WorkerCommand::Exit.to_line() {
                let _ = self.write_line(&line).await;
            }
            // exit is silent; a stray reply is drained and ignored
            let _ = tokio::time::timeout(self.timeouts.exit, self.stdout.next_line()).await;
            drop(self.stdin.take());

            match tokio::time::timeout(self.timeouts.exit, self.child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("Worker exited with {}", status),
                _ => {
                    tracing::warn!("Worker did not exit in time, killing it");
                    self.kill().await;
                }
            }
        } else if self.state != WorkerState::Stopped {
            self.kill().await;
        }
        self.state = WorkerState::Stopped;
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!("Failed to kill worker: {}", e);
        }
        self.state = WorkerState::Stopped;
    }
}

#[async_trait]
impl NodeRunner for Worker {
    fn mode(&self) -> RunnerMode {
        RunnerMode::Worker
    }

    async fn run_node(&mut self, script_path: &Path, input: &Context) -> Result<Context, NodeError> {
        let reply = self
            .request(&WorkerCommand::RunNode {
                script_path: script_path.to_path_buf(),
                input_data: input.clone(),
            })
            .await?;

        if reply.success {
            into_output(reply.data)
        } else {
            Err(NodeError::ExecutionFailed {
                message: reply.error.unwrap_or_else(|| "unknown worker error".to_string()),
                traceback: reply.traceback,
            })
        }
    }

    async fn shutdown(self: Box<Self>) {
        Worker::shutdown(*self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_runner_writes_protocol_peer() {
        let dir = tempfile::tempdir().unwrap();
        let path = install_runner(dir.path()).await.unwrap();

        assert_eq!(path.file_name().unwrap(), RUNNER_FILE_NAME);
        let source = std::fs::read_to_string(&path).unwrap();
        assert!(source.contains("print(\"READY\", flush=True)"));
        assert!(source.contains("###JSON_OUTPUT_END###"));
    }

    #[tokio::test]
    async fn start_fails_for_missing_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let runner = install_runner(dir.path()).await.unwrap();
        let result = Worker::start(
            Path::new("/nonexistent/python"),
            &runner,
            WorkerTimeouts::default(),
        )
        .await;
        assert!(matches!(result, Err(TransportError::Spawn(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_times_out_without_ready_line() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("silent.sh");
        std::fs::write(&script, "sleep 5\n").unwrap();

        let timeouts = WorkerTimeouts {
            startup: Duration::from_millis(200),
            ..WorkerTimeouts::default()
        };
        let result = Worker::start(Path::new("/bin/sh"), &script, timeouts).await;
        assert!(matches!(result, Err(TransportError::StartupTimeout { .. })));
    }
}
