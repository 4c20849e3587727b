// src/network/generate.rs

//! Lazy, single-pass job generation.
//!
//! For each chunk produced by the chunker, the generator obtains an analyzer
//! ordering, then repeatedly pulls one batch from every still-live node in
//! that ordering (round-robin across ordering positions), flattens the round
//! into one combined batch and hands it to the orchestrator. Exhausted node
//! generators are dropped; the generator stops as soon as the run's
//! `executing` flag is cleared.
//!
//! The orchestrator drains the backend to zero pending jobs between batches,
//! so by the time `next_batch` is called again every previously emitted job
//! has published its result. That drain is what makes the ready-sample
//! computation below correct.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::data::Datum;
use crate::errors::{EngineError, Result};
use crate::job::core::{HoldSpec, Job, JobKind, JobSpec, StatusObserver};
use crate::job::payload::{Argument, Cardinality};
use crate::network::chunker::{NetworkAnalyzer, NetworkChunker};
use crate::network::graph::NetworkGraph;
use crate::network::node::{Node, NodeKind};
use crate::tool::OutputSpec;
use crate::types::{NetworkId, NodeId, SampleId};

/// Upper bound on jobs pulled from one node generator per round.
pub const JOB_BATCH_SIZE: usize = 100;

/// Per-node generator state within the current chunk.
#[derive(Debug)]
struct NodeCursor {
    node: NodeId,
    /// Emission keys already produced: sample id, or `sample#index` for
    /// sink writes.
    emitted: BTreeSet<String>,
    next_index: usize,
    exhausted: bool,
}

impl NodeCursor {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            emitted: BTreeSet::new(),
            next_index: 0,
            exhausted: false,
        }
    }
}

pub struct JobGenerator {
    network_id: NetworkId,
    /// Analyzer orderings per chunk, sinks already dropped when nested.
    chunks: Vec<Vec<NodeId>>,
    chunk_idx: usize,
    cursors: Vec<NodeCursor>,
    /// Nodes from fully processed chunks.
    done_nodes: HashSet<NodeId>,
    executing: Arc<AtomicBool>,
    observer: Option<StatusObserver>,
    batch_size: usize,
}

impl JobGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        network_id: NetworkId,
        graph: &NetworkGraph,
        nodes: &HashMap<NodeId, Node>,
        chunker: &mut dyn NetworkChunker,
        analyzer: &dyn NetworkAnalyzer,
        nested: bool,
        executing: Arc<AtomicBool>,
        observer: Option<StatusObserver>,
    ) -> Result<Self> {
        let mut chunks = Vec::new();
        for chunk in chunker.chunk_network(graph) {
            let mut order = analyzer.analyze_network(graph, &chunk)?;
            if nested {
                // A parent orchestration consumes this run's results; drop
                // sinks to avoid duplicate externalization.
                order.retain(|id| {
                    nodes
                        .get(id)
                        .map(|n| n.kind() != NodeKind::Sink)
                        .unwrap_or(false)
                });
            }
            chunks.push(order);
        }

        debug!(
            network = %network_id,
            chunks = chunks.len(),
            nested,
            "job generator initialised"
        );

        Ok(Self {
            network_id,
            chunks,
            chunk_idx: 0,
            cursors: Vec::new(),
            done_nodes: HashSet::new(),
            executing,
            observer,
            batch_size: JOB_BATCH_SIZE,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Produce the next combined batch, or `None` when the network is fully
    /// generated or the run was aborted.
    pub fn next_batch(&mut self, nodes: &HashMap<NodeId, Node>) -> Result<Option<Vec<Job>>> {
        loop {
            if !self.executing.load(Ordering::SeqCst) {
                debug!(network = %self.network_id, "generator stopping: run aborted");
                return Ok(None);
            }
            if self.chunk_idx >= self.chunks.len() {
                return Ok(None);
            }
            if self.cursors.is_empty() {
                self.cursors = self.chunks[self.chunk_idx]
                    .iter()
                    .cloned()
                    .map(NodeCursor::new)
                    .collect();
            }

            // Nodes whose generation is complete as of the start of this
            // round; their published results are final (the orchestrator
            // drained between batches).
            let complete: HashSet<NodeId> = self
                .done_nodes
                .iter()
                .cloned()
                .chain(
                    self.cursors
                        .iter()
                        .filter(|c| c.exhausted)
                        .map(|c| c.node.clone()),
                )
                .collect();

            let mut batch = Vec::new();
            for i in 0..self.cursors.len() {
                if self.cursors[i].exhausted {
                    continue;
                }
                let node_id = self.cursors[i].node.clone();
                let node = nodes
                    .get(&node_id)
                    .ok_or_else(|| EngineError::NodeNotFound(node_id.clone()))?;

                let jobs = self.pull_node_batch(i, node, nodes, &complete)?;
                batch.extend(jobs);
            }

            let all_exhausted = self.cursors.iter().all(|c| c.exhausted);
            if all_exhausted {
                self.done_nodes
                    .extend(self.chunks[self.chunk_idx].iter().cloned());
                self.chunk_idx += 1;
                self.cursors.clear();
                if !batch.is_empty() {
                    return Ok(Some(batch));
                }
                continue;
            }

            if !batch.is_empty() {
                return Ok(Some(batch));
            }

            // An empty round with live generators means a node is waiting on
            // results that will never arrive; bail out of the chunk instead
            // of spinning.
            warn!(
                network = %self.network_id,
                chunk = self.chunk_idx,
                "no progress in generation round; abandoning chunk"
            );
            self.done_nodes
                .extend(self.chunks[self.chunk_idx].iter().cloned());
            self.chunk_idx += 1;
            self.cursors.clear();
        }
    }

    /// Pull up to one batch of jobs from a single node generator.
    fn pull_node_batch(
        &mut self,
        cursor_idx: usize,
        node: &Node,
        nodes: &HashMap<NodeId, Node>,
        complete: &HashSet<NodeId>,
    ) -> Result<Vec<Job>> {
        let deps = node.def.depends_on.clone();
        let deps_complete = deps.iter().all(|d| complete.contains(d));

        let candidates: Vec<String> = match node.kind() {
            NodeKind::Source => node
                .source_samples()
                .into_iter()
                .filter(|s| !self.cursors[cursor_idx].emitted.contains(s))
                .collect(),
            NodeKind::Step => {
                let ready = ready_samples(&deps, nodes);
                ready
                    .into_iter()
                    .filter(|s| !self.cursors[cursor_idx].emitted.contains(s))
                    .collect()
            }
            NodeKind::Sink => {
                let mut keys = Vec::new();
                for sample in ready_samples(&deps, nodes) {
                    for index in 0..sink_value_count(&deps, nodes, &sample) {
                        let key = format!("{sample}#{index}");
                        if !self.cursors[cursor_idx].emitted.contains(&key) {
                            keys.push(key);
                        }
                    }
                }
                keys
            }
        };

        let take = candidates.len().min(self.batch_size);
        let mut jobs = Vec::with_capacity(take);
        for key in &candidates[..take] {
            let job = match node.kind() {
                NodeKind::Source => self.make_source_job(node, key, cursor_idx)?,
                NodeKind::Step => self.make_step_job(node, key, nodes, cursor_idx)?,
                NodeKind::Sink => {
                    let (sample, index) = key
                        .rsplit_once('#')
                        .ok_or_else(|| EngineError::ConfigError(format!("bad sink key '{key}'")))?;
                    let index: usize = index
                        .parse()
                        .map_err(|_| EngineError::ConfigError(format!("bad sink key '{key}'")))?;
                    self.make_sink_job(node, sample, index, nodes, cursor_idx)?
                }
            };
            self.cursors[cursor_idx].emitted.insert(key.clone());
            jobs.push(job);
        }

        // A generator is exhausted once its sample universe is final and
        // every candidate has been emitted.
        let universe_final = match node.kind() {
            NodeKind::Source => true,
            _ => deps_complete,
        };
        if universe_final && candidates.len() == take {
            self.cursors[cursor_idx].exhausted = true;
            debug!(node = %node.id(), "node generator exhausted");
        }

        Ok(jobs)
    }

    fn next_sample_index(&mut self, cursor_idx: usize) -> usize {
        let idx = self.cursors[cursor_idx].next_index;
        self.cursors[cursor_idx].next_index += 1;
        idx
    }

    fn make_source_job(
        &mut self,
        node: &Node,
        sample: &str,
        cursor_idx: usize,
    ) -> Result<Job> {
        let values = node
            .source_data
            .as_ref()
            .and_then(|d| d.get(sample))
            .cloned()
            .ok_or_else(|| EngineError::MissingBinding {
                kind: "source",
                node: node.id().to_string(),
            })?;

        let datatype = node
            .def
            .sample_datatype
            .clone()
            .unwrap_or_else(|| "Any".to_string());
        let output_name = node
            .def
            .tool
            .outputs
            .first()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "output".to_string());

        let mut out = OutputSpec::new(&output_name, &datatype);
        out.cardinality = Cardinality::Count(values.len());

        // Literal values are published inline; URL values need the source
        // tool to fetch them.
        let all_urls = !values.is_empty() && values.iter().all(|v| v.contains("://"));
        let kind = if all_urls {
            JobKind::Source
        } else {
            JobKind::Inline {
                data: BTreeMap::from([(output_name.clone(), values.clone())]),
            }
        };

        let data = values
            .iter()
            .map(|v| Datum::new(v.clone(), datatype.clone()))
            .collect::<Vec<_>>();
        let input_args = BTreeMap::from([(
            "input".to_string(),
            Argument::with_data(BTreeMap::from([(sample.to_string(), data)])),
        )]);

        let sample_index = self.next_sample_index(cursor_idx);
        Ok(Job::new(JobSpec {
            network_id: self.network_id.clone(),
            node_id: node.id().to_string(),
            sample_id: sample.to_string(),
            sample_index,
            kind,
            tool_name: node.def.tool.name.clone(),
            tool_version: node.def.tool.version.clone(),
            input_args,
            outputs: vec![out],
            sample_datatype: Some(datatype),
            resources: node.def.resources.clone(),
            hold: HoldSpec::None,
            preferred_types: node.def.preferred_types.clone(),
            observer: self.observer.clone(),
        }))
    }

    fn make_step_job(
        &mut self,
        node: &Node,
        sample: &str,
        nodes: &HashMap<NodeId, Node>,
        cursor_idx: usize,
    ) -> Result<Job> {
        let mut input_args = BTreeMap::new();
        let mut hold = BTreeSet::new();

        for dep in &node.def.depends_on {
            let upstream = nodes
                .get(dep)
                .ok_or_else(|| EngineError::NodeNotFound(dep.clone()))?;
            let result = upstream.result(sample).ok_or_else(|| {
                EngineError::ConfigError(format!(
                    "sample '{sample}' scheduled on '{}' before '{dep}' published it",
                    node.id()
                ))
            })?;

            let data: Vec<Datum> = result.data.values().flatten().cloned().collect();
            input_args.insert(
                dep.clone(),
                Argument::with_data(BTreeMap::from([(sample.to_string(), data)])),
            );
            hold.insert(result.job_id.clone());
        }

        let sample_index = self.next_sample_index(cursor_idx);
        Ok(Job::new(JobSpec {
            network_id: self.network_id.clone(),
            node_id: node.id().to_string(),
            sample_id: sample.to_string(),
            sample_index,
            kind: JobKind::Standard,
            tool_name: node.def.tool.name.clone(),
            tool_version: node.def.tool.version.clone(),
            input_args,
            outputs: node.def.tool.outputs.clone(),
            sample_datatype: None,
            resources: node.def.resources.clone(),
            hold: HoldSpec::Many(hold),
            preferred_types: node.def.preferred_types.clone(),
            observer: self.observer.clone(),
        }))
    }

    fn make_sink_job(
        &mut self,
        node: &Node,
        sample: &str,
        write_index: usize,
        nodes: &HashMap<NodeId, Node>,
        cursor_idx: usize,
    ) -> Result<Job> {
        let template = node
            .sink_template()
            .ok_or_else(|| EngineError::MissingBinding {
                kind: "sink",
                node: node.id().to_string(),
            })?
            .to_string();

        let dep = node.def.depends_on.first().ok_or_else(|| {
            EngineError::ConfigError(format!("sink '{}' has no upstream node", node.id()))
        })?;
        let upstream = nodes
            .get(dep)
            .ok_or_else(|| EngineError::NodeNotFound(dep.clone()))?;
        let result = upstream.result(sample).ok_or_else(|| {
            EngineError::ConfigError(format!(
                "sample '{sample}' scheduled on sink '{}' before '{dep}' published it",
                node.id()
            ))
        })?;

        let all_values: Vec<&Datum> = result.data.values().flatten().collect();
        let datum = all_values.get(write_index).cloned().cloned().ok_or_else(|| {
            EngineError::ConfigError(format!(
                "sink '{}' write {write_index} out of range for sample '{sample}'",
                node.id()
            ))
        })?;

        let input_args = BTreeMap::from([(
            "input".to_string(),
            Argument::with_data(BTreeMap::from([(sample.to_string(), vec![datum])])),
        )]);

        let mut outputs = node.def.tool.outputs.clone();
        if outputs.is_empty() {
            outputs.push(OutputSpec::new("target", "Any"));
        }

        let sample_index = self.next_sample_index(cursor_idx);
        Ok(Job::new(JobSpec {
            network_id: self.network_id.clone(),
            node_id: node.id().to_string(),
            sample_id: sample.to_string(),
            sample_index,
            kind: JobKind::Sink {
                write_index,
                template,
            },
            tool_name: node.def.tool.name.clone(),
            tool_version: node.def.tool.version.clone(),
            input_args,
            outputs,
            sample_datatype: None,
            resources: node.def.resources.clone(),
            hold: HoldSpec::One(result.job_id.clone()),
            preferred_types: node.def.preferred_types.clone(),
            observer: self.observer.clone(),
        }))
    }
}

/// Samples every listed dependency has published a result for.
fn ready_samples(deps: &[NodeId], nodes: &HashMap<NodeId, Node>) -> Vec<SampleId> {
    let Some(first) = deps.first() else {
        return Vec::new();
    };
    let Some(first_node) = nodes.get(first) else {
        return Vec::new();
    };

    first_node
        .results()
        .keys()
        .filter(|sample| {
            deps[1..].iter().all(|dep| {
                nodes
                    .get(dep)
                    .map(|n| n.result(sample).is_some())
                    .unwrap_or(false)
            })
        })
        .cloned()
        .collect()
}

/// Number of values the sink's primary dependency published for a sample.
fn sink_value_count(deps: &[NodeId], nodes: &HashMap<NodeId, Node>, sample: &str) -> usize {
    deps.first()
        .and_then(|dep| nodes.get(dep))
        .and_then(|n| n.result(sample))
        .map(|r| r.data.values().map(Vec::len).sum())
        .unwrap_or(0)
}
