use crate::{FlowError, NodeConfig, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

pub type NodeId = String;

/// A node graph plus its name; the unit a run executes.
///
/// Nodes keep their insertion order, which the scheduler uses to break ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "WorkflowDocument", into = "WorkflowDocument")]
pub struct Workflow {
    pub name: String,
    nodes: Vec<NodeSpec>,
    edges: Vec<Edge>,
    /// Dependency snapshot persisted alongside the graph, if any
    pub dependencies: Option<Vec<String>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            dependencies: None,
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> Result<NodeId, WorkflowError> {
        if self.find_node(&node.id).is_some() {
            return Err(WorkflowError::DuplicateNode(node.id));
        }
        let id = node.id.clone();
        self.nodes.push(node);
        Ok(id)
    }

    /// Add an ordering constraint. Endpoints are checked at schedule time.
    pub fn connect(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) {
        let edge = Edge::new(from, to);

        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == edge.from) {
            node.output_ids.push(edge.to.clone());
        }
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == edge.to) {
            node.input_ids.push(edge.from.clone());
        }

        self.edges.push(edge);
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Distinct node types, in order of first appearance
    pub fn node_types(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .map(|n| n.node_type.as_str())
            .filter(|t| seen.insert(*t))
            .collect()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let workflow: Workflow = WorkflowDocument::load(path)?.try_into()?;
        tracing::debug!(
            "Loaded workflow {} ({} nodes) from {}",
            workflow.name,
            workflow.nodes.len(),
            path.display()
        );
        Ok(workflow)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FlowError> {
        let path = path.as_ref();
        WorkflowDocument::from(self.clone()).save(path)?;
        tracing::debug!("Saved workflow {} to {}", self.name, path.display());
        Ok(())
    }
}

/// Node instance in a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    #[serde(rename = "node_id")]
    pub id: NodeId,
    pub node_type: String,
    #[serde(default)]
    pub config: NodeConfig,
    /// Derived from edges; kept for display only
    #[serde(rename = "inputs", default)]
    pub input_ids: Vec<NodeId>,
    /// Derived from edges; kept for display only
    #[serde(rename = "outputs", default)]
    pub output_ids: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: NodeConfig::new(),
            input_ids: Vec::new(),
            output_ids: Vec::new(),
            position: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position { x, y });
        self
    }
}

/// Ordering constraint between two nodes. Carries no data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(NodeId, NodeId)", into = "(NodeId, NodeId)")]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl From<(NodeId, NodeId)> for Edge {
    fn from((from, to): (NodeId, NodeId)) -> Self {
        Self { from, to }
    }
}

impl From<Edge> for (NodeId, NodeId) {
    fn from(edge: Edge) -> Self {
        (edge.from, edge.to)
    }
}

/// Node position in the visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Persisted JSON shape of a workflow, as written by the editor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub workflow_name: String,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
}

impl WorkflowDocument {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FlowError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl TryFrom<WorkflowDocument> for Workflow {
    type Error = WorkflowError;

    fn try_from(doc: WorkflowDocument) -> Result<Self, Self::Error> {
        let mut workflow = Workflow::new(doc.workflow_name);
        workflow.dependencies = doc.dependencies;

        for mut node in doc.nodes {
            node.input_ids.clear();
            node.output_ids.clear();
            workflow.add_node(node)?;
        }
        for edge in doc.edges {
            workflow.connect(edge.from, edge.to);
        }

        Ok(workflow)
    }
}

impl From<Workflow> for WorkflowDocument {
    fn from(workflow: Workflow) -> Self {
        Self {
            workflow_name: workflow.name,
            nodes: workflow.nodes,
            edges: workflow.edges,
            dependencies: workflow.dependencies,
        }
    }
}
