use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("Node '{node_id}' failed: {source}")]
    Node {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    pub fn node(node_id: impl Into<String>, source: NodeError) -> Self {
        FlowError::Node {
            node_id: node_id.into(),
            source,
        }
    }

    /// True for failures detected before anything was spawned.
    pub fn is_structural(&self) -> bool {
        matches!(self, FlowError::Workflow(_))
    }
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("{message}")]
    ExecutionFailed {
        message: String,
        traceback: Option<String>,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid node output: {0}")]
    InvalidOutput(String),
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::ExecutionFailed {
            message: message.into(),
            traceback: None,
        }
    }
}

/// Failures of the pipe between the engine and an interpreter process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to spawn interpreter: {0}")]
    Spawn(String),

    #[error("worker did not report READY within {seconds}s")]
    StartupTimeout { seconds: u64 },

    #[error("no reply within {seconds}s")]
    ReadTimeout { seconds: u64 },

    #[error("broken pipe: {0}")]
    BrokenPipe(String),

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("process exited unexpectedly")]
    UnexpectedExit,
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Cyclic dependency detected between nodes: {}", nodes.join(", "))]
    CyclicDependency { nodes: Vec<String> },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),
}

#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("package manager executable not found")]
    ToolNotFound,

    #[error("failed to create environment for '{workflow}': {reason}")]
    CreateFailed { workflow: String, reason: String },

    #[error("invalid workflow name '{0}'")]
    InvalidWorkflowName(String),

    #[error("environment for '{0}' does not exist")]
    MissingEnvironment(String),

    #[error("failed to install '{package}': {reason}")]
    InstallFailed { package: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
