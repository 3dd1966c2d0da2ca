//! Topological scheduling of a workflow graph.
//!
//! Kahn's algorithm with a FIFO queue. Nodes with no inbound edges are seeded
//! in the workflow's insertion order and successors are released in edge
//! order, so the same graph always yields the same schedule.

use isocore::{NodeId, Workflow, WorkflowError};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, VecDeque};

/// Compute the execution order, or fail if the graph is not a DAG.
pub fn schedule(workflow: &Workflow) -> Result<Vec<NodeId>, WorkflowError> {
    let graph = build_graph(workflow)?;
    let count = graph.node_count();

    let mut in_degree = vec![0usize; count];
    let mut successors: Vec<Vec<NodeIndex>> = vec![Vec::new(); count];
    for edge in graph.raw_edges() {
        in_degree[edge.target().index()] += 1;
    }
    // raw_edges() keeps insertion order, unlike neighbor iteration
    for edge in graph.raw_edges() {
        successors[edge.source().index()].push(edge.target());
    }

    let mut queue: VecDeque<NodeIndex> = graph
        .node_indices()
        .filter(|idx| in_degree[idx.index()] == 0)
        .collect();
    let mut order = Vec::with_capacity(count);

    while let Some(idx) = queue.pop_front() {
        order.push(graph[idx].to_string());

        for &next in &successors[idx.index()] {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != count {
        return Err(WorkflowError::CyclicDependency {
            nodes: cyclic_nodes(&graph),
        });
    }

    tracing::debug!("Execution order: {:?}", order);
    Ok(order)
}

/// Build a dependency graph from the workflow
fn build_graph(workflow: &Workflow) -> Result<DiGraph<&str, ()>, WorkflowError> {
    let mut graph = DiGraph::new();
    let mut node_to_index = HashMap::new();

    for node in workflow.nodes() {
        let idx = graph.add_node(node.id.as_str());
        if node_to_index.insert(node.id.as_str(), idx).is_some() {
            return Err(WorkflowError::DuplicateNode(node.id.clone()));
        }
    }

    for edge in workflow.edges() {
        let from = node_to_index
            .get(edge.from.as_str())
            .ok_or_else(|| WorkflowError::NodeNotFound(edge.from.clone()))?;
        let to = node_to_index
            .get(edge.to.as_str())
            .ok_or_else(|| WorkflowError::NodeNotFound(edge.to.clone()))?;

        graph.add_edge(*from, *to, ());
    }

    Ok(graph)
}

/// Nodes that sit on some cycle, in insertion order
fn cyclic_nodes(graph: &DiGraph<&str, ()>) -> Vec<NodeId> {
    let mut on_cycle: Vec<NodeIndex> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .collect();
    on_cycle.sort();
    on_cycle.into_iter().map(|idx| graph[idx].to_string()).collect()
}
