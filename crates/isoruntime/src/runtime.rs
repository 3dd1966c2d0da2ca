use crate::config::RuntimeConfig;
use crate::env::EnvManager;
use crate::executor::{ExecutionResult, WorkflowExecutor};
use crate::registry::NodeRegistry;
use isocore::{Context, EventBus, ExecutionEvent, FlowError, Workflow, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Main runtime for executing workflows
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    executor: Arc<WorkflowExecutor>,
    event_bus: Arc<EventBus>,
    workflows: Arc<RwLock<HashMap<String, Workflow>>>,
}

impl FlowRuntime {
    /// Create a new runtime with default settings and an empty registry
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let executor = Arc::new(WorkflowExecutor::new(config));

        Self {
            registry,
            executor,
            event_bus,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.executor.config()
    }

    pub fn env_manager(&self) -> &Arc<EnvManager> {
        self.executor.env_manager()
    }

    /// Register a workflow under its name, replacing any previous one
    pub async fn register_workflow(&self, workflow: Workflow) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.name.clone(), workflow);
    }

    /// Execute a registered workflow by name
    pub async fn execute_workflow(
        &self,
        name: &str,
        initial: Context,
    ) -> Result<ExecutionResult, FlowError> {
        let workflow = self
            .workflows
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(name.to_string()))?;

        self.execute(&workflow, initial).await
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(
        &self,
        workflow: &Workflow,
        initial: Context,
    ) -> Result<ExecutionResult, FlowError> {
        self.execute_with_cancel(workflow, initial, &CancellationToken::new())
            .await
    }

    /// Execute a workflow that stops once `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        workflow: &Workflow,
        initial: Context,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, FlowError> {
        self.executor
            .execute(workflow, &self.registry, &self.event_bus, initial, cancel)
            .await
    }

    /// Evaluate a workflow in-process without generating or spawning anything
    pub fn preview(&self, workflow: &Workflow, initial: Context) -> Result<ExecutionResult, FlowError> {
        self.executor.preview(workflow, &self.registry, initial)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_workflow_is_not_found() {
        let runtime = FlowRuntime::new();
        let err = runtime
            .execute_workflow("nope", Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Workflow(WorkflowError::NotFound(ref n)) if n == "nope"));
    }

    /// Runs a registered workflow whose interpreter takes a second to fail
    #[cfg(unix)]
    #[tokio::test]
    async fn registration_is_not_blocked_by_a_running_workflow() {
        use isocore::{NodeConfig, NodeError, NodeKind, NodeSpec, ScriptBody};
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        struct Noop;

        impl NodeKind for Noop {
            fn node_type(&self) -> &str {
                "noop"
            }

            fn render(&self, _config: &NodeConfig) -> Result<ScriptBody, NodeError> {
                Ok(ScriptBody::Inline("output_data = {}".to_string()))
            }
        }

        let tmp = tempfile::TempDir::new().unwrap();
        let interpreter = tmp.path().join("slow-python");
        std::fs::write(&interpreter, "#!/bin/sh\nsleep 1\nexit 1\n").unwrap();
        std::fs::set_permissions(&interpreter, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(Noop));
        let runtime = Arc::new(FlowRuntime::with_registry(
            Arc::new(registry),
            RuntimeConfig {
                workspace_root: tmp.path().join("workflows"),
                isolate: false,
                interpreter,
                ..RuntimeConfig::default()
            },
        ));

        let mut slow = Workflow::new("slow");
        slow.add_node(NodeSpec::new("a", "noop")).unwrap();
        runtime.register_workflow(slow).await;

        let mut events = runtime.subscribe_events();
        let running = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.execute_workflow("slow", Context::new()).await }
        });
        while let Ok(event) = events.recv().await {
            if matches!(event, ExecutionEvent::WorkflowStarted { .. }) {
                break;
            }
        }

        tokio::time::timeout(
            Duration::from_millis(500),
            runtime.register_workflow(Workflow::new("other")),
        )
        .await
        .expect("registration waited for the running workflow");
        assert!(running.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn registered_empty_workflow_previews() {
        let runtime = FlowRuntime::new();
        runtime.register_workflow(Workflow::new("empty")).await;

        let result = runtime.preview(&Workflow::new("empty"), Context::new()).unwrap();
        assert!(result.context.is_empty());
        assert!(result.execution_order.is_empty());
    }
}
