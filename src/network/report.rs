// src/network/report.rs

//! End-of-run summary: per-sink, per-sample outcomes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::errors::Result;
use crate::job::state::JobState;
use crate::types::{JobId, NetworkId, NodeId, SampleId};

/// Outcome of one sample at one sink.
#[derive(Debug, Clone, Serialize)]
pub struct SampleOutcome {
    pub job_id: JobId,
    pub state: JobState,
    pub errors: Vec<String>,
}

impl SampleOutcome {
    /// A sample only counts as delivered when the sink job finished cleanly
    /// and nothing upstream of it failed.
    pub fn succeeded(&self) -> bool {
        !self.state.is_error() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkReport {
    pub node: NodeId,
    pub samples: BTreeMap<SampleId, SampleOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

impl SinkReport {
    pub fn new(node: NodeId, samples: BTreeMap<SampleId, SampleOutcome>) -> Self {
        let succeeded = samples.values().filter(|s| s.succeeded()).count();
        let failed = samples.len() - succeeded;
        Self {
            node,
            samples,
            succeeded,
            failed,
        }
    }
}

/// Full run summary, also externalized as `sink_report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub network: NetworkId,
    pub sinks: Vec<SinkReport>,
    pub aborted: bool,
}

impl RunReport {
    /// A run succeeds when it was not aborted and no sink saw a failed
    /// sample.
    pub fn overall_success(&self) -> bool {
        !self.aborted && self.sinks.iter().all(|s| s.failed == 0)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }
}
