//! Per-workflow isolated environments.
//!
//! Each workflow owns `<workspace_root>/<workflow>/` with its interpreter
//! environment in `.venv` and generated scripts in `scripts`. Environments
//! are created and populated with `uv`, located through a fixed search order
//! and validated by running it before use.

use crate::config::RuntimeConfig;
use dashmap::DashMap;
use isocore::EnvironmentError;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;

const VENV_DIR: &str = ".venv";
const SCRIPTS_DIR: &str = "scripts";
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(windows)]
const TOOL_BINARY: &str = "uv.exe";
#[cfg(not(windows))]
const TOOL_BINARY: &str = "uv";

pub struct EnvManager {
    config: RuntimeConfig,
    cached_tool: Mutex<Option<PathBuf>>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl EnvManager {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            cached_tool: Mutex::new(None),
            locks: DashMap::new(),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.config.workspace_root
    }

    pub fn workflow_dir(&self, workflow: &str) -> PathBuf {
        self.config.workspace_root.join(workflow)
    }

    pub fn venv_path(&self, workflow: &str) -> PathBuf {
        self.workflow_dir(workflow).join(VENV_DIR)
    }

    pub fn scripts_dir(&self, workflow: &str) -> PathBuf {
        self.workflow_dir(workflow).join(SCRIPTS_DIR)
    }

    /// Interpreter inside the workflow's environment
    pub fn python_executable(&self, workflow: &str) -> PathBuf {
        let venv = self.venv_path(workflow);
        if cfg!(windows) {
            venv.join("Scripts").join("python.exe")
        } else {
            venv.join("bin").join("python")
        }
    }

    /// Reject names that would place a workflow's directory outside the
    /// workspace root.
    pub fn check_workflow_name(&self, workflow: &str) -> Result<(), EnvironmentError> {
        let mut components = Path::new(workflow).components();
        let single_normal = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if single_normal && !workflow.contains(['/', '\\']) {
            Ok(())
        } else {
            Err(EnvironmentError::InvalidWorkflowName(workflow.to_string()))
        }
    }

    pub fn environment_exists(&self, workflow: &str) -> bool {
        self.venv_path(workflow).exists()
    }

    /// Locate a working `uv`.
    ///
    /// Candidates are tried in order: `explicit`, the cached or configured
    /// selection, the executable search path, then well-known install
    /// locations. A candidate is used only if `--version` succeeds.
    pub async fn resolve_tool_path(&self, explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            if probe_version(path).await {
                self.remember_tool(path);
                return Some(path.to_path_buf());
            }
            tracing::warn!("Requested uv at {} is not usable", path.display());
        }

        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(cached) = self.cached_tool() {
            candidates.push(cached);
        }
        if let Some(configured) = &self.config.uv_path {
            candidates.push(configured.clone());
        }
        candidates.extend(search_path_candidates());
        candidates.extend(well_known_locations());

        for candidate in candidates {
            if probe_version(&candidate).await {
                tracing::debug!("Using uv at {}", candidate.display());
                self.remember_tool(&candidate);
                return Some(candidate);
            }
        }

        None
    }

    pub async fn tool_installed(&self) -> bool {
        self.resolve_tool_path(None).await.is_some()
    }

    async fn require_tool(&self) -> Result<PathBuf, EnvironmentError> {
        self.resolve_tool_path(None)
            .await
            .ok_or(EnvironmentError::ToolNotFound)
    }

    fn cached_tool(&self) -> Option<PathBuf> {
        self.cached_tool.lock().ok().and_then(|guard| guard.clone())
    }

    fn remember_tool(&self, path: &Path) {
        if let Ok(mut guard) = self.cached_tool.lock() {
            *guard = Some(path.to_path_buf());
        }
    }

    fn workflow_lock(&self, workflow: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(workflow.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Create the workflow's environment unless it already exists.
    ///
    /// Returns the environment's interpreter. Concurrent calls for the same
    /// workflow are serialised.
    pub async fn ensure_environment(
        &self,
        workflow: &str,
        python_version: Option<&str>,
    ) -> Result<PathBuf, EnvironmentError> {
        self.check_workflow_name(workflow)?;
        let lock = self.workflow_lock(workflow);
        let _guard = lock.lock().await;

        let venv = self.venv_path(workflow);
        if venv.exists() {
            tracing::debug!("Reusing environment {}", venv.display());
            return Ok(self.python_executable(workflow));
        }

        let tool = self.require_tool().await?;
        let workflow_dir = self.workflow_dir(workflow);
        tokio::fs::create_dir_all(&workflow_dir).await?;

        let mut command = Command::new(&tool);
        command.arg("venv").arg(&venv).current_dir(&workflow_dir);
        if let Some(version) = python_version.or(self.config.python_version.as_deref()) {
            command.arg("--python").arg(version);
        }

        tracing::info!("Creating environment for {} at {}", workflow, venv.display());
        let timeout = Duration::from_secs(self.config.env_create_timeout_secs);
        run_tool(command, timeout)
            .await
            .map_err(|reason| EnvironmentError::CreateFailed {
                workflow: workflow.to_string(),
                reason,
            })?;

        Ok(self.python_executable(workflow))
    }

    /// Install `packages` into the workflow's environment, one invocation per
    /// requirement, in the given order.
    ///
    /// `mirror` overrides the configured index URL.
    pub async fn install(
        &self,
        workflow: &str,
        packages: &[String],
        mirror: Option<&str>,
    ) -> Result<(), EnvironmentError> {
        self.check_workflow_name(workflow)?;
        if packages.is_empty() {
            return Ok(());
        }
        if !self.environment_exists(workflow) {
            return Err(EnvironmentError::MissingEnvironment(workflow.to_string()));
        }

        let tool = self.require_tool().await?;
        let python = self.python_executable(workflow);
        let index_url = mirror.or(self.config.index_url.as_deref());
        let timeout = Duration::from_secs(self.config.install_timeout_secs);

        for package in packages {
            let mut command = Command::new(&tool);
            command
                .args(["pip", "install"])
                .arg(package)
                .arg("--python")
                .arg(&python);
            if let Some(url) = index_url {
                command.arg("--index-url").arg(url);
            }

            tracing::info!("Installing {} into {}", package, workflow);
            run_tool(command, timeout)
                .await
                .map_err(|reason| EnvironmentError::InstallFailed {
                    package: package.clone(),
                    reason,
                })?;
        }

        Ok(())
    }

    /// Remove the workflow's environment. Returns whether one existed.
    pub async fn delete_environment(&self, workflow: &str) -> Result<bool, EnvironmentError> {
        self.check_workflow_name(workflow)?;
        let lock = self.workflow_lock(workflow);
        let _guard = lock.lock().await;

        let venv = self.venv_path(workflow);
        if !venv.exists() {
            return Ok(false);
        }
        tokio::fs::remove_dir_all(&venv).await?;
        tracing::info!("Deleted environment {}", venv.display());
        Ok(true)
    }
}

async fn probe_version(path: &Path) -> bool {
    let mut command = Command::new(path);
    command.arg("--version");
    run_tool(command, VERSION_PROBE_TIMEOUT).await.is_ok()
}

/// Run a tool to completion, mapping any failure to a readable reason
async fn run_tool(mut command: Command, timeout: Duration) -> Result<String, String> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| e.to_string())?;
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| format!("timed out after {}s", timeout.as_secs()))?
        .map_err(|e| e.to_string())?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        })
    }
}

fn search_path_candidates() -> Vec<PathBuf> {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(TOOL_BINARY))
                .filter(|candidate| candidate.is_file())
                .collect()
        })
        .unwrap_or_default()
}

fn well_known_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".local").join("bin").join(TOOL_BINARY));
        locations.push(home.join(".cargo").join("bin").join(TOOL_BINARY));
    }

    if cfg!(windows) {
        if let Some(local) = dirs::data_local_dir() {
            locations.push(local.join("Programs").join("uv").join(TOOL_BINARY));
            locations.push(local.join("uv").join(TOOL_BINARY));
        }
        if let Some(program_files) = std::env::var_os("ProgramFiles") {
            locations.push(PathBuf::from(program_files).join("uv").join(TOOL_BINARY));
        }
        if let Some(home) = dirs::home_dir() {
            locations.push(home.join("scoop").join("shims").join(TOOL_BINARY));
        }
    } else {
        locations.push(PathBuf::from("/usr/local/bin").join(TOOL_BINARY));
        locations.push(PathBuf::from("/opt/homebrew/bin").join(TOOL_BINARY));
        locations.push(PathBuf::from("/usr/bin").join(TOOL_BINARY));
    }

    locations.into_iter().filter(|p| p.is_file()).collect()
}
