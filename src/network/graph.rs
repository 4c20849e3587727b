// src/network/graph.rs

//! Directed acyclic graph of the network's nodes.
//!
//! Built from a [`NetworkDefinition`]; rejects cyclic definitions at
//! construction. Adjacency lookups drive job generation and failure
//! propagation; the petgraph representation backs the default analyzer's
//! topological ordering.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::errors::{EngineError, Result};
use crate::network::node::NetworkDefinition;
use crate::types::NodeId;

#[derive(Debug, Clone)]
pub struct NetworkGraph {
    graph: DiGraph<NodeId, ()>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl NetworkGraph {
    /// Build the graph from a network definition.
    ///
    /// Edges point from a dependency to its dependent. Unknown dependency
    /// references and cycles are hard errors.
    pub fn from_definition(definition: &NetworkDefinition) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for node in &definition.nodes {
            let idx = graph.add_node(node.id.clone());
            indices.insert(node.id.clone(), idx);
        }

        for node in &definition.nodes {
            let to = indices[&node.id];
            for dep in &node.depends_on {
                let from = indices.get(dep).ok_or_else(|| {
                    EngineError::ConfigError(format!(
                        "node '{}' depends on unknown node '{dep}'",
                        node.id
                    ))
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let name = graph[cycle.node_id()].clone();
            return Err(EngineError::NetworkCycle(name));
        }

        Ok(Self { graph, indices })
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(String::as_str)
    }

    /// Immediate dependencies of a node.
    pub fn dependencies_of(&self, node: &str) -> Vec<NodeId> {
        self.neighbors(node, petgraph::Direction::Incoming)
    }

    /// Immediate dependents of a node.
    pub fn dependents_of(&self, node: &str) -> Vec<NodeId> {
        self.neighbors(node, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, node: &str, dir: petgraph::Direction) -> Vec<NodeId> {
        let Some(&idx) = self.indices.get(node) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Full topological ordering of the graph.
    ///
    /// The definition was cycle-checked at construction, so this cannot fail
    /// on the same graph.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let order = toposort(&self.graph, None)
            .map_err(|cycle| EngineError::NetworkCycle(self.graph[cycle.node_id()].clone()))?;
        Ok(order.into_iter().map(|idx| self.graph[idx].clone()).collect())
    }
}
