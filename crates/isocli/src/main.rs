// crates/isocli/src/main.rs

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use isocore::{Context, ExecutionEvent, NodeSpec, Workflow};
use isoruntime::{
    collect_dependencies, find_conflicts, load_config, resolve, schedule, EnvManager,
    FlowRuntime, NodeRegistry, RuntimeConfig, CONFIG_FILE_NAME,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "isoflow")]
#[command(about = "Isolated workflow engine CLI", long_about = None)]
struct Cli {
    /// Path to a TOML config file (defaults to ./isoflow.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory of custom node definitions
    #[arg(long, global = true, default_value = "custom_nodes")]
    nodes_dir: PathBuf,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial context as a JSON object
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Check a workflow file for structural problems
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Evaluate a workflow in-process with built-in previews
    Preview {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long)]
        input: Option<String>,
    },

    /// Show the dependencies a workflow needs
    Deps {
        file: PathBuf,
    },

    /// Manage per-workflow environments
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },

    /// List available node types
    Nodes,

    /// Create an example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum EnvAction {
    /// Create a workflow's environment if it does not exist
    Create {
        workflow: String,

        #[arg(long)]
        python: Option<String>,
    },

    /// Delete a workflow's environment
    Delete { workflow: String },

    /// Show which package manager executable would be used
    Which {
        #[arg(long)]
        uv: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let config = load_config(&config_path).await;
    tracing::debug!(
        "Workspace root {}, worker mode {:?}",
        config.workspace_root.display(),
        config.worker_mode
    );

    match cli.command {
        Commands::Run { file, input } => {
            let registry = build_registry(&cli.nodes_dir);
            run_workflow(&file, input, registry, config).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file, &build_registry(&cli.nodes_dir))?;
        }

        Commands::Preview { file, input } => {
            preview_workflow(&file, input, build_registry(&cli.nodes_dir), config)?;
        }

        Commands::Deps { file } => {
            show_dependencies(&file, &build_registry(&cli.nodes_dir))?;
        }

        Commands::Env { action } => {
            manage_environment(action, config).await?;
        }

        Commands::Nodes => {
            list_nodes(&build_registry(&cli.nodes_dir));
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_registry(nodes_dir: &Path) -> NodeRegistry {
    let mut registry = isonodes::builtin_registry();
    isonodes::register_custom_nodes(&mut registry, nodes_dir);
    registry
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    Workflow::load(file).with_context(|| format!("failed to load {}", file.display()))
}

fn parse_input(input: Option<String>) -> Result<Context> {
    let Some(input) = input else {
        return Ok(Context::new());
    };
    match serde_json::from_str::<serde_json::Value>(&input)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("Input must be a JSON object"),
    }
}

async fn run_workflow(
    file: &Path,
    input: Option<String>,
    registry: NodeRegistry,
    config: RuntimeConfig,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(file)?;
    let initial = parse_input(input)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes().len());
    println!("   Edges: {}", workflow.edges().len());
    println!();

    let runtime = FlowRuntime::with_registry(Arc::new(registry), config);

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { workflow_name, .. } => {
                    println!("▶️  Workflow {} started", workflow_name);
                }
                ExecutionEvent::EnvironmentReady {
                    interpreter,
                    packages,
                    ..
                } => {
                    println!("  🐍 Interpreter: {}", interpreter);
                    if !packages.is_empty() {
                        println!("     Packages: {}", packages.join(", "));
                    }
                }
                ExecutionEvent::NodeStarted {
                    node_id, node_type, ..
                } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    duration_ms,
                    ..
                } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::WorkflowCompleted {
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Workflow completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Workflow failed after {}ms", duration_ms);
                    }
                }
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("🛑 Cancelling...");
                cancel.cancel();
            }
        })
    };

    let result = runtime
        .execute_with_cancel(&workflow, initial, &cancel)
        .await;
    ctrl_c.abort();

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let result = result?;
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Order: {}", result.execution_order.join(" -> "));
    if let Some(mode) = result.runner_mode {
        println!("   Runner: {:?}", mode);
    }
    println!();
    println!("📤 Context:");
    println!("{}", serde_json::to_string_pretty(&result.context)?);

    Ok(())
}

fn validate_workflow(file: &Path, registry: &NodeRegistry) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let order = schedule(&workflow)?;

    let unknown: Vec<&str> = workflow
        .node_types()
        .into_iter()
        .filter(|t| !registry.contains(t))
        .collect();
    if !unknown.is_empty() {
        bail!("Unknown node types: {}", unknown.join(", "));
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes().len());
    println!("   Edges: {}", workflow.edges().len());
    println!("   Order: {}", order.join(" -> "));

    Ok(())
}

fn preview_workflow(
    file: &Path,
    input: Option<String>,
    registry: NodeRegistry,
    config: RuntimeConfig,
) -> Result<()> {
    let workflow = load_workflow(file)?;
    let runtime = FlowRuntime::with_registry(Arc::new(registry), config);
    let result = runtime.preview(&workflow, parse_input(input)?)?;

    println!("👀 Preview of {}", workflow.name);
    println!("   Order: {}", result.execution_order.join(" -> "));
    println!("{}", serde_json::to_string_pretty(&result.context)?);
    Ok(())
}

fn show_dependencies(file: &Path, registry: &NodeRegistry) -> Result<()> {
    let workflow = load_workflow(file)?;
    let collected = collect_dependencies(&workflow, registry);
    let resolved = resolve(&collected);

    println!("📦 Dependencies for {}", workflow.name);
    if resolved.is_empty() {
        println!("   (none)");
    }
    for requirement in &resolved {
        println!("   {}", requirement);
    }

    for conflict in find_conflicts(&resolved) {
        println!(
            "⚠️  {} is requested as {} ({} is installed last)",
            conflict.name,
            conflict.variants.join(", "),
            conflict.effective
        );
    }
    Ok(())
}

async fn manage_environment(action: EnvAction, config: RuntimeConfig) -> Result<()> {
    let env = EnvManager::new(config);

    match action {
        EnvAction::Create { workflow, python } => {
            let interpreter = env.ensure_environment(&workflow, python.as_deref()).await?;
            println!("✅ Environment ready: {}", interpreter.display());
        }
        EnvAction::Delete { workflow } => {
            if env.delete_environment(&workflow).await? {
                println!("🗑️  Deleted environment for {}", workflow);
            } else {
                println!("No environment exists for {}", workflow);
            }
        }
        EnvAction::Which { uv } => match env.resolve_tool_path(uv.as_deref()).await {
            Some(path) => println!("{}", path.display()),
            None => bail!("uv was not found; install it or set uv_path in {}", CONFIG_FILE_NAME),
        },
    }
    Ok(())
}

fn list_nodes(registry: &NodeRegistry) {
    println!("📦 Available Node Types:");
    println!();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            if !metadata.description.is_empty() {
                println!("    {}", metadata.description);
            }
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("linear_calc");

    let assign = |id: &str, name: &str, value: &str, y: f64| {
        NodeSpec::new(id, "variable_assign")
            .with_config("variable_name", name)
            .with_config("value", value)
            .with_config("value_type", "int")
            .with_position(100.0, y)
    };
    workflow.add_node(assign("A", "x", "10", 100.0))?;
    workflow.add_node(assign("B", "y", "20", 250.0))?;
    workflow.add_node(
        NodeSpec::new("C", "variable_calc")
            .with_config("expression", "x + y*2")
            .with_config("output_var", "result")
            .with_position(350.0, 175.0),
    )?;
    workflow.connect("A", "C");
    workflow.connect("B", "C");

    workflow.save(output)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  isoflow run --file {}", output.display());

    Ok(())
}
