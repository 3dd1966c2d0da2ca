//! Core abstractions for the isolated workflow engine
//!
//! This crate provides the graph model, the node-kind trait, the execution
//! context and the error taxonomy that every other crate depends on. It never
//! spawns processes.

mod context;
mod error;
pub mod events;
mod node;
mod workflow;

pub use context::{Context, ExecutionContext};
pub use error::{EnvironmentError, FlowError, NodeError, TransportError, WorkflowError};
pub use events::{EventBus, ExecutionEvent, ExecutionId};
pub use node::{KindMetadata, NodeConfig, NodeKind, ScriptBody};
pub use workflow::{Edge, NodeId, NodeSpec, Position, Workflow, WorkflowDocument};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
