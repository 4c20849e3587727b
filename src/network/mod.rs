// src/network/mod.rs

//! Network orchestration: graph, nodes, job generation and the run driver.

pub mod chunker;
pub mod generate;
pub mod graph;
pub mod node;
pub mod report;
pub mod run;

pub use chunker::{Chunk, NetworkAnalyzer, NetworkChunker, SingleChunker, TopologicalAnalyzer};
pub use generate::{JOB_BATCH_SIZE, JobGenerator};
pub use graph::NetworkGraph;
pub use node::{NetworkDefinition, Node, NodeDefinition, NodeKind, NodeResult};
pub use report::{RunReport, SampleOutcome, SinkReport};
pub use run::{AbortHandle, NetworkRun, POLL_INTERVAL, RunOptions};
