//! Runtime configuration.
//!
//! Reads a TOML file into [`RuntimeConfig`]. A missing file yields the
//! defaults; a file that cannot be read or parsed is logged and also yields
//! the defaults, so a bad config never blocks a run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "isoflow.toml";

/// How node scripts are invoked during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// One long-lived worker per run, falling back to one-shot if it cannot start
    Persistent,
    /// A fresh interpreter per node
    OneShot,
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding one sub-directory per workflow
    pub workspace_root: PathBuf,
    /// Stored package-manager selection
    pub uv_path: Option<PathBuf>,
    /// Stored package index mirror
    pub index_url: Option<String>,
    pub python_version: Option<String>,
    /// Run inside a per-workflow environment
    pub isolate: bool,
    /// Interpreter used when `isolate` is off
    pub interpreter: PathBuf,
    pub worker_mode: WorkerMode,
    pub startup_timeout_secs: u64,
    pub node_timeout_secs: u64,
    pub exit_timeout_ms: u64,
    pub env_create_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("workflows"),
            uv_path: None,
            index_url: None,
            python_version: None,
            isolate: true,
            interpreter: PathBuf::from("python3"),
            worker_mode: WorkerMode::Persistent,
            startup_timeout_secs: 10,
            node_timeout_secs: 300,
            exit_timeout_ms: 1000,
            env_create_timeout_secs: 60,
            install_timeout_secs: 300,
            event_buffer_size: 1000,
        }
    }
}

impl RuntimeConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }
}

/// Load configuration from `path`, falling back to defaults.
pub async fn load_config(path: &Path) -> RuntimeConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return RuntimeConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return RuntimeConfig::default();
        }
    };

    match toml::from_str::<RuntimeConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            RuntimeConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join(CONFIG_FILE_NAME)).await;
        assert!(config.isolate);
        assert_eq!(config.worker_mode, WorkerMode::Persistent);
        assert_eq!(config.node_timeout_secs, 300);
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(
            &path,
            r#"
workspace_root = "/srv/flows"
index_url = "https://mirrors.example.org/pypi/simple"
worker_mode = "one_shot"
node_timeout_secs = 5
"#,
        )
        .await
        .unwrap();

        let config = load_config(&path).await;
        assert_eq!(config.workspace_root, PathBuf::from("/srv/flows"));
        assert_eq!(
            config.index_url.as_deref(),
            Some("https://mirrors.example.org/pypi/simple")
        );
        assert_eq!(config.worker_mode, WorkerMode::OneShot);
        assert_eq!(config.node_timeout(), Duration::from_secs(5));
        assert_eq!(config.startup_timeout_secs, 10);
    }

    #[tokio::test]
    async fn invalid_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "isolate = maybe {").await.unwrap();

        let config = load_config(&path).await;
        assert!(config.isolate);
        assert!(config.index_url.is_none());
    }
}
