// src/network/chunker.rs

//! Pluggable chunking and ordering abstractions.
//!
//! The orchestrator consumes both as black boxes: a [`NetworkChunker`]
//! splits the graph into schedulable chunks, a [`NetworkAnalyzer`] produces
//! a per-chunk topological node order. The default implementations cover the
//! common case of a single chunk ordered by petgraph's toposort; deployments
//! with smarter partitioning provide their own.

use crate::errors::Result;
use crate::network::graph::NetworkGraph;
use crate::types::NodeId;

/// A schedulable subset of the network's nodes.
pub type Chunk = Vec<NodeId>;

pub trait NetworkChunker: Send {
    fn chunk_network(&mut self, graph: &NetworkGraph) -> Vec<Chunk>;
}

pub trait NetworkAnalyzer: Send {
    /// Topological ordering of the chunk's nodes (sinks included).
    fn analyze_network(&self, graph: &NetworkGraph, chunk: &Chunk) -> Result<Vec<NodeId>>;
}

/// Default chunker: the whole network as a single chunk.
#[derive(Debug, Default)]
pub struct SingleChunker;

impl NetworkChunker for SingleChunker {
    fn chunk_network(&mut self, graph: &NetworkGraph) -> Vec<Chunk> {
        vec![graph.node_ids().map(str::to_string).collect()]
    }
}

/// Default analyzer: petgraph toposort of the whole graph, filtered down to
/// the chunk's members.
#[derive(Debug, Default)]
pub struct TopologicalAnalyzer;

impl NetworkAnalyzer for TopologicalAnalyzer {
    fn analyze_network(&self, graph: &NetworkGraph, chunk: &Chunk) -> Result<Vec<NodeId>> {
        let order = graph.topological_order()?;
        Ok(order.into_iter().filter(|n| chunk.contains(n)).collect())
    }
}
