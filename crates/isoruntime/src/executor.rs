use crate::codegen::ScriptGenerator;
use crate::config::{RuntimeConfig, WorkerMode};
use crate::deps::{collect_dependencies, resolve};
use crate::env::EnvManager;
use crate::registry::NodeRegistry;
use crate::runner::{NodeRunner, OneShotRunner, RunnerMode};
use crate::scheduler::schedule;
use crate::worker::{install_runner, Worker, WorkerTimeouts};
use chrono::Utc;
use isocore::{
    Context, EventBus, ExecutionContext, ExecutionEvent, ExecutionId, FlowError, NodeError,
    NodeId, NodeKind, NodeSpec, Workflow,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Runs workflows one node at a time in schedule order.
///
/// Every node executes as a generated script inside the workflow's
/// environment, through a persistent worker when one can be started and a
/// fresh interpreter per node otherwise.
pub struct WorkflowExecutor {
    config: RuntimeConfig,
    env: Arc<EnvManager>,
}

/// A node paired with its resolved kind
struct PlannedNode<'a> {
    spec: &'a NodeSpec,
    kind: Arc<dyn NodeKind>,
}

impl WorkflowExecutor {
    pub fn new(config: RuntimeConfig) -> Self {
        let env = Arc::new(EnvManager::new(config.clone()));
        Self { config, env }
    }

    pub fn with_env_manager(config: RuntimeConfig, env: Arc<EnvManager>) -> Self {
        Self { config, env }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn env_manager(&self) -> &Arc<EnvManager> {
        &self.env
    }

    /// Execute a workflow and return the final context.
    ///
    /// Structural problems are reported before any directory, script or
    /// process is created. The first failing node stops the run.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        registry: &NodeRegistry,
        event_bus: &EventBus,
        initial: Context,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, FlowError> {
        let execution_id = ExecutionId::new_v4();
        let start_time = Instant::now();

        event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_name: workflow.name.clone(),
            timestamp: Utc::now(),
        });

        tracing::info!("Starting workflow execution: {}", workflow.name);

        let result = self
            .run(workflow, registry, event_bus, execution_id, initial, cancel)
            .await;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        event_bus.emit(ExecutionEvent::WorkflowCompleted {
            execution_id,
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        match &result {
            Ok(_) => tracing::info!("Workflow {} completed in {}ms", workflow.name, duration_ms),
            Err(e) => tracing::error!("Workflow {} failed: {}", workflow.name, e),
        }

        result.map(|mut r| {
            r.duration_ms = duration_ms;
            r
        })
    }

    async fn run(
        &self,
        workflow: &Workflow,
        registry: &NodeRegistry,
        event_bus: &EventBus,
        execution_id: ExecutionId,
        initial: Context,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, FlowError> {
        let order = schedule(workflow)?;
        tracing::debug!("Execution order: {}", order.join(" -> "));
        let plan = plan(workflow, registry, &order)?;
        self.env.check_workflow_name(&workflow.name)?;

        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        let packages = resolve(&collect_dependencies(workflow, registry));
        let interpreter = self.prepare_environment(&workflow.name, &packages).await?;
        event_bus.emit(ExecutionEvent::EnvironmentReady {
            execution_id,
            interpreter: interpreter.display().to_string(),
            packages: packages.clone(),
            timestamp: Utc::now(),
        });

        let generator = ScriptGenerator::new(self.env.scripts_dir(&workflow.name));
        let mut script_paths = BTreeMap::new();
        for node in &plan {
            let path = generator.generate(node.spec, node.kind.as_ref())?;
            script_paths.insert(node.spec.id.clone(), path);
        }

        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        let mut runner = self
            .start_runner(&interpreter, &self.env.workflow_dir(&workflow.name))
            .await?;
        let runner_mode = runner.mode();

        let mut context = ExecutionContext::new(initial);
        let outcome = run_nodes(
            runner.as_mut(),
            &plan,
            &script_paths,
            &mut context,
            event_bus,
            execution_id,
            cancel,
        )
        .await;
        runner.shutdown().await;
        outcome?;

        Ok(ExecutionResult {
            execution_id,
            workflow_name: workflow.name.clone(),
            context: context.into_inner(),
            execution_order: order,
            script_paths,
            runner_mode: Some(runner_mode),
            node_count: workflow.nodes().len(),
            edge_count: workflow.edges().len(),
            duration_ms: 0,
        })
    }

    /// Make the interpreter available, returning its path
    async fn prepare_environment(
        &self,
        workflow: &str,
        packages: &[String],
    ) -> Result<PathBuf, FlowError> {
        if !self.config.isolate {
            tracing::debug!(
                "Isolation disabled, running {} with {}",
                workflow,
                self.config.interpreter.display()
            );
            return Ok(self.config.interpreter.clone());
        }

        let interpreter = self
            .env
            .ensure_environment(workflow, self.config.python_version.as_deref())
            .await?;
        self.env.install(workflow, packages, None).await?;

        if !interpreter.exists() {
            tracing::warn!(
                "Environment for {} has no interpreter at {}, using {}",
                workflow,
                interpreter.display(),
                self.config.interpreter.display()
            );
            return Ok(self.config.interpreter.clone());
        }
        Ok(interpreter)
    }

    async fn start_runner(
        &self,
        interpreter: &Path,
        workflow_dir: &Path,
    ) -> Result<Box<dyn NodeRunner>, FlowError> {
        let one_shot = || -> Box<dyn NodeRunner> {
            Box::new(OneShotRunner::new(interpreter, self.config.node_timeout()))
        };

        if self.config.worker_mode == WorkerMode::OneShot {
            return Ok(one_shot());
        }

        let runner_script = install_runner(workflow_dir).await?;
        let timeouts = WorkerTimeouts {
            startup: self.config.startup_timeout(),
            node: self.config.node_timeout(),
            exit: self.config.exit_timeout(),
        };

        match Worker::start(interpreter, &runner_script, timeouts).await {
            Ok(worker) => Ok(Box::new(worker)),
            Err(e) => {
                tracing::warn!("Worker unavailable ({}), falling back to one-shot execution", e);
                Ok(one_shot())
            }
        }
    }

    /// Evaluate a workflow in-process with each kind's preview logic.
    ///
    /// Nothing is generated or spawned; kinds without a preview fail the run.
    pub fn preview(
        &self,
        workflow: &Workflow,
        registry: &NodeRegistry,
        initial: Context,
    ) -> Result<ExecutionResult, FlowError> {
        let start_time = Instant::now();
        let order = schedule(workflow)?;
        let plan = plan(workflow, registry, &order)?;

        let mut context = ExecutionContext::new(initial);
        for node in &plan {
            let output = node
                .kind
                .execute(&node.spec.config, &context.snapshot())
                .map_err(|e| FlowError::node(&node.spec.id, e))?;
            context.merge(output);
        }

        Ok(ExecutionResult {
            execution_id: ExecutionId::new_v4(),
            workflow_name: workflow.name.clone(),
            context: context.into_inner(),
            execution_order: order,
            script_paths: BTreeMap::new(),
            runner_mode: None,
            node_count: workflow.nodes().len(),
            edge_count: workflow.edges().len(),
            duration_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}

fn plan<'a>(
    workflow: &'a Workflow,
    registry: &NodeRegistry,
    order: &[NodeId],
) -> Result<Vec<PlannedNode<'a>>, FlowError> {
    let mut plan = Vec::with_capacity(order.len());
    for id in order {
        let spec = workflow
            .find_node(id)
            .ok_or_else(|| isocore::WorkflowError::NodeNotFound(id.clone()))?;
        let kind = registry.kind(&spec.node_type)?;
        kind.validate_config(&spec.config)
            .map_err(|e| FlowError::node(&spec.id, e))?;
        plan.push(PlannedNode { spec, kind });
    }
    Ok(plan)
}

async fn run_nodes(
    runner: &mut dyn NodeRunner,
    plan: &[PlannedNode<'_>],
    script_paths: &BTreeMap<NodeId, PathBuf>,
    context: &mut ExecutionContext,
    event_bus: &EventBus,
    execution_id: ExecutionId,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    for node in plan {
        let node_id = &node.spec.id;
        let script = script_paths
            .get(node_id)
            .ok_or_else(|| isocore::WorkflowError::NodeNotFound(node_id.clone()))?;

        event_bus.emit(ExecutionEvent::NodeStarted {
            execution_id,
            node_id: node_id.clone(),
            node_type: node.spec.node_type.clone(),
            timestamp: Utc::now(),
        });

        let input = context.snapshot();
        let start = Instant::now();
        let result: Result<Context, NodeError> = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Execution cancelled before {} finished", node_id);
                return Err(FlowError::Cancelled);
            }
            result = runner.run_node(script, &input) => result,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                tracing::info!("Node {} completed in {}ms", node_id, duration_ms);
                event_bus.emit(ExecutionEvent::NodeCompleted {
                    execution_id,
                    node_id: node_id.clone(),
                    outputs: output.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                context.merge(output);
            }
            Err(e) => {
                tracing::error!("Node {} failed: {}", node_id, e);
                if let NodeError::ExecutionFailed {
                    traceback: Some(traceback),
                    ..
                } = &e
                {
                    tracing::debug!("Traceback for {}:\n{}", node_id, traceback);
                }
                event_bus.emit(ExecutionEvent::NodeFailed {
                    execution_id,
                    node_id: node_id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(FlowError::node(node_id, e));
            }
        }
    }
    Ok(())
}

/// Result of workflow execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub workflow_name: String,
    /// Final execution context
    pub context: Context,
    pub execution_order: Vec<NodeId>,
    pub script_paths: BTreeMap<NodeId, PathBuf>,
    /// `None` for previews
    pub runner_mode: Option<RunnerMode>,
    pub node_count: usize,
    pub edge_count: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub executed_nodes: usize,
    pub execution_order: Vec<NodeId>,
    pub context_keys: Vec<String>,
}

impl ExecutionResult {
    pub fn stats(&self) -> ExecutionStats {
        ExecutionStats {
            total_nodes: self.node_count,
            total_edges: self.edge_count,
            executed_nodes: self.execution_order.len(),
            execution_order: self.execution_order.clone(),
            context_keys: self.context.keys().cloned().collect(),
        }
    }
}
