//! Workflow execution runtime
//!
//! This crate turns a node graph into an isolated run: it schedules nodes,
//! renders each one into a standalone script, prepares the workflow's
//! interpreter environment and drives the scripts through a worker process.

pub mod codegen;
pub mod config;
pub mod deps;
pub mod env;
mod executor;
pub mod protocol;
mod registry;
pub mod runner;
mod runtime;
pub mod scheduler;
pub mod worker;

pub use codegen::{classify_source, ScriptGenerator};
pub use config::{load_config, RuntimeConfig, WorkerMode, CONFIG_FILE_NAME};
pub use deps::{collect_dependencies, find_conflicts, resolve, DependencyConflict};
pub use env::EnvManager;
pub use executor::{ExecutionResult, ExecutionStats, WorkflowExecutor};
pub use registry::{NodeRegistry, NodeTypeRegistry};
pub use runner::{NodeRunner, OneShotRunner, RunnerMode};
pub use runtime::FlowRuntime;
pub use scheduler::schedule;
pub use worker::{Worker, WorkerState, WorkerTimeouts};
