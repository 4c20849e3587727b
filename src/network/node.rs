// src/network/node.rs

//! Run-level nodes: template definition plus live per-sample output state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{Datum, FailedAnnotation};
use crate::job::core::Job;
use crate::job::resources::ResourceRequest;
use crate::job::state::JobState;
use crate::tool::ToolSpec;
use crate::types::{JobId, NetworkId, NodeId, SampleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Source,
    Step,
    Sink,
}

/// Template-level description of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: NodeId,
    pub kind: NodeKind,
    pub tool: ToolSpec,
    pub depends_on: Vec<NodeId>,
    /// Declared sample-level datatype (source nodes).
    #[serde(default)]
    pub sample_datatype: Option<String>,
    /// Filename template for sink targets; may be overridden by the
    /// per-run sink binding.
    #[serde(default)]
    pub sink_template: Option<String>,
    #[serde(default)]
    pub resources: ResourceRequest,
    #[serde(default)]
    pub preferred_types: Vec<String>,
}

/// A declarative, versioned network template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDefinition {
    pub id: NetworkId,
    pub version: String,
    pub nodes: Vec<NodeDefinition>,
}

impl NetworkDefinition {
    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Published result of one job, visible to downstream nodes.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub job_id: JobId,
    pub state: JobState,
    pub data: BTreeMap<String, Vec<Datum>>,
    pub failed: Vec<FailedAnnotation>,
}

/// Live state of one node in a run.
#[derive(Debug, Clone)]
pub struct Node {
    pub def: NodeDefinition,
    /// Source binding: sample id -> raw values. Set at execute time.
    pub source_data: Option<BTreeMap<SampleId, Vec<String>>>,
    /// Sink binding: target template. Set at execute time.
    pub sink_target: Option<String>,
    /// Source readiness, recomputed when a binding arrives.
    pub ready: bool,
    results: BTreeMap<SampleId, NodeResult>,
}

impl Node {
    pub fn new(def: NodeDefinition) -> Self {
        let ready = def.kind != NodeKind::Source;
        Self {
            def,
            source_data: None,
            sink_target: None,
            ready,
            results: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn kind(&self) -> NodeKind {
        self.def.kind
    }

    /// Bind concrete source data and recompute readiness.
    pub fn bind_source(&mut self, data: BTreeMap<SampleId, Vec<String>>) {
        self.ready = !data.is_empty();
        self.source_data = Some(data);
    }

    /// Bind the sink target template for this run.
    pub fn bind_sink(&mut self, target: String) {
        self.sink_target = Some(target);
    }

    /// Effective sink template: the run binding wins over the definition.
    pub fn sink_template(&self) -> Option<&str> {
        self.sink_target
            .as_deref()
            .or(self.def.sink_template.as_deref())
    }

    /// Publish a finished job's outputs for downstream consumption.
    ///
    /// Failure annotations are attached to every published datum so they
    /// propagate transitively to consumers. A failed job with no outputs at
    /// all still publishes one placeholder datum per declared output; the
    /// placeholder carries the annotations so downstream jobs are generated
    /// and resolved as failed instead of silently dropped.
    pub fn set_result(&mut self, job: &Job, failed: Vec<FailedAnnotation>) {
        let mut data = job.output_data.clone();
        if data.is_empty() && !failed.is_empty() {
            let names: Vec<String> = if self.def.tool.outputs.is_empty() {
                vec!["output".to_string()]
            } else {
                self.def
                    .tool
                    .outputs
                    .iter()
                    .filter(|o| !o.automatic)
                    .map(|o| o.name.clone())
                    .collect()
            };
            for name in names {
                let placeholder = Datum::new(format!("failed://{}", job.id()), "Any");
                data.insert(name, vec![placeholder]);
            }
        }
        if !failed.is_empty() {
            for values in data.values_mut() {
                for datum in values.iter_mut() {
                    datum.annotations.extend(failed.iter().cloned());
                }
            }
        }

        debug!(
            node = %self.def.id,
            sample = %job.sample_id,
            job = %job.id(),
            state = %job.state(),
            failed = failed.len(),
            "publishing job result on node"
        );

        self.results.insert(
            job.sample_id.clone(),
            NodeResult {
                job_id: job.id().to_string(),
                state: job.state(),
                data,
                failed,
            },
        );
    }

    pub fn result(&self, sample: &str) -> Option<&NodeResult> {
        self.results.get(sample)
    }

    pub fn results(&self) -> &BTreeMap<SampleId, NodeResult> {
        &self.results
    }

    /// Sample ids a source node was bound with.
    pub fn source_samples(&self) -> Vec<SampleId> {
        self.source_data
            .as_ref()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }
}
