// src/job/core.rs

//! The `Job` entity: one concrete invocation of a tool for one sample.
//!
//! A job owns its identity, argument maps, status history and produced data.
//! It is created by the run's job generator, mutated in place by `execute`,
//! and considered resolved once a terminal state is reached and its result
//! has been published to the owning node.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::{DatatypeRegistry, Datum};
use crate::errors::{EngineError, Result};
use crate::job::payload::{Argument, ArgumentValue, Payload};
use crate::job::resources::ResourceRequest;
use crate::job::result_store::{ResultStore, StoredJobRecord};
use crate::job::state::{JobState, StatusRecord};
use crate::tool::{ExecutionContext, InterfaceResult, OutputSpec, ToolInterface};
use crate::types::{JobId, NetworkId, NodeId, SampleId};
use crate::version::{self, CompatibilityCheck, Severity};

/// Synchronous observer invoked on every status change.
pub type StatusObserver = Arc<dyn Fn(&Job) + Send + Sync>;

/// Specialization hooks; same contract, different behaviour at the seams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Standard,
    /// Source jobs coerce output against the node's single sample-level
    /// datatype and validate on empty stderr.
    Source,
    /// Sink jobs append a write-index discriminator to their id, substitute
    /// filename-template tokens and always re-run (external side effects).
    Sink { write_index: usize, template: String },
    /// Inline jobs never call a tool interface; their raw result is fixed at
    /// construction and provenance is collected synchronously.
    Inline { data: BTreeMap<String, Vec<String>> },
}

/// Jobs this job must wait on before running.
///
/// The shape is closed at the type level; there is no invalid variant to
/// reject at runtime.
#[derive(Debug, Clone, Default)]
pub enum HoldSpec {
    #[default]
    None,
    One(JobId),
    Many(BTreeSet<JobId>),
}

impl HoldSpec {
    fn into_set(self) -> BTreeSet<JobId> {
        match self {
            HoldSpec::None => BTreeSet::new(),
            HoldSpec::One(id) => BTreeSet::from([id]),
            HoldSpec::Many(ids) => ids,
        }
    }
}

impl From<JobId> for HoldSpec {
    fn from(id: JobId) -> Self {
        HoldSpec::One(id)
    }
}

impl From<Vec<JobId>> for HoldSpec {
    fn from(ids: Vec<JobId>) -> Self {
        HoldSpec::Many(ids.into_iter().collect())
    }
}

impl From<BTreeSet<JobId>> for HoldSpec {
    fn from(ids: BTreeSet<JobId>) -> Self {
        HoldSpec::Many(ids)
    }
}

/// Record of what produced a job's outputs, for audit and caching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub tool_name: String,
    pub tool_version: String,
    pub input_hashes: BTreeMap<String, String>,
    pub initialized_at: DateTime<Utc>,
    pub collected_at: Option<DateTime<Utc>>,
}

impl Provenance {
    fn init(tool_name: &str, tool_version: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            tool_version: tool_version.to_string(),
            input_hashes: BTreeMap::new(),
            initialized_at: Utc::now(),
            collected_at: None,
        }
    }

    fn collect(&mut self, input_hashes: BTreeMap<String, String>) {
        self.input_hashes = input_hashes;
        self.collected_at = Some(Utc::now());
    }
}

/// Everything needed to construct a [`Job`].
pub struct JobSpec {
    pub network_id: NetworkId,
    pub node_id: NodeId,
    pub sample_id: SampleId,
    pub sample_index: usize,
    pub kind: JobKind,
    pub tool_name: String,
    pub tool_version: String,
    pub input_args: BTreeMap<String, Argument>,
    pub outputs: Vec<OutputSpec>,
    /// Declared sample-level datatype, used by source jobs.
    pub sample_datatype: Option<String>,
    pub resources: ResourceRequest,
    pub hold: HoldSpec,
    pub preferred_types: Vec<String>,
    pub observer: Option<StatusObserver>,
}

/// A single schedulable unit.
pub struct Job {
    id: JobId,
    pub network_id: NetworkId,
    pub node_id: NodeId,
    pub sample_id: SampleId,
    pub sample_index: usize,
    pub kind: JobKind,
    pub tool_name: String,
    pub tool_version: String,
    /// Engine version this job was created under.
    pub engine_version: String,
    pub input_args: BTreeMap<String, Argument>,
    pub outputs: Vec<OutputSpec>,
    pub sample_datatype: Option<String>,
    pub resources: ResourceRequest,
    pub hold_jobs: BTreeSet<JobId>,
    pub errors: Vec<String>,
    pub input_hashes: BTreeMap<String, String>,
    pub output_hashes: BTreeMap<String, String>,
    pub provenance: Option<Provenance>,
    /// Canonical typed output data, filled by `execute`.
    pub output_data: BTreeMap<String, Vec<Datum>>,
    pub preferred_types: Vec<String>,
    status_history: Vec<StatusRecord>,
    observer: Option<StatusObserver>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        let id = Self::compute_id(
            &spec.network_id,
            &spec.node_id,
            &spec.sample_id,
            &spec.kind,
        );

        let mut job = Self {
            id,
            network_id: spec.network_id,
            node_id: spec.node_id,
            sample_id: spec.sample_id,
            sample_index: spec.sample_index,
            kind: spec.kind,
            tool_name: spec.tool_name,
            tool_version: spec.tool_version,
            engine_version: version::ENGINE_VERSION.to_string(),
            input_args: spec.input_args,
            outputs: spec.outputs,
            sample_datatype: spec.sample_datatype,
            resources: spec.resources,
            hold_jobs: spec.hold.into_set(),
            errors: Vec::new(),
            input_hashes: BTreeMap::new(),
            output_hashes: BTreeMap::new(),
            provenance: None,
            output_data: BTreeMap::new(),
            preferred_types: spec.preferred_types,
            status_history: Vec::new(),
            observer: spec.observer,
        };

        // Nonexistent -> Created is always legal.
        let _ = job.set_status(JobState::Created);

        // Inline jobs have no async execute phase to defer provenance to.
        if matches!(job.kind, JobKind::Inline { .. }) {
            job.hash_inputs();
            let mut prov = Provenance::init(&job.tool_name, &job.tool_version);
            prov.collect(job.input_hashes.clone());
            job.provenance = Some(prov);
        }

        job
    }

    fn compute_id(network: &str, node: &str, sample: &str, kind: &JobKind) -> JobId {
        let base = format!("{network}__{node}__{sample}");
        match kind {
            JobKind::Sink { write_index, .. } => format!("{base}__{write_index}"),
            _ => base,
        }
    }

    /// Deterministic id, stable for the lifetime of the job. Used as both
    /// the dedup/cache key and the storage-location key.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state: the last history entry, or `Nonexistent` before any.
    pub fn state(&self) -> JobState {
        self.status_history
            .last()
            .map(|r| r.state)
            .unwrap_or(JobState::Nonexistent)
    }

    /// Monotonically appended status history.
    pub fn status_history(&self) -> &[StatusRecord] {
        &self.status_history
    }

    /// Append a state to the history.
    ///
    /// Setting the current state again is a no-op (no duplicate history
    /// entries). Illegal edges are rejected. On any actual change the
    /// observer callback is invoked synchronously with the job.
    pub fn set_status(&mut self, state: JobState) -> Result<()> {
        let current = self.state();
        if !self.status_history.is_empty() && current == state {
            return Ok(());
        }
        if !current.can_transition_to(state) {
            return Err(EngineError::IllegalTransition {
                from: current,
                to: state,
            });
        }

        self.status_history.push(StatusRecord::now(state));
        debug!(job = %self.id, from = %current, to = %state, "job status change");

        if let Some(observer) = self.observer.clone() {
            observer(self);
        }
        Ok(())
    }

    /// Resolve abstract per-argument values into the concrete payload.
    pub fn create_payload(&self) -> Result<Payload> {
        let mut payload = Payload::default();

        for (name, arg) in &self.input_args {
            payload.inputs.insert(name.clone(), arg.resolve());
        }

        // Outputs resolve in declaration order so `as:`/`val:` references to
        // earlier outputs work.
        for out in &self.outputs {
            if out.automatic {
                payload
                    .outputs
                    .insert(out.name.clone(), ArgumentValue::Auto(out.requested));
                continue;
            }
            let count = out.cardinality.resolve(&payload)?;
            let targets = (0..count).map(|i| self.output_target(out, i)).collect();
            payload
                .outputs
                .insert(out.name.clone(), ArgumentValue::Flat(targets));
        }

        if let JobKind::Sink { .. } = &self.kind {
            self.append_provenance_side_channel(&mut payload);
        }

        Ok(payload)
    }

    fn output_target(&self, out: &OutputSpec, index: usize) -> String {
        match &self.kind {
            // Each write of the same logical sink gets its own cardinality
            // slot, so sibling writes never target the same file.
            JobKind::Sink {
                template,
                write_index,
            } => self.substitute_sink_tokens(template, write_index + index),
            _ => format!("vfs://{}/{}_{}", self.id, out.name, index),
        }
    }

    fn substitute_sink_tokens(&self, template: &str, index: usize) -> String {
        template
            .replace("{sample_id}", &self.sample_id)
            .replace("{cardinality}", &index.to_string())
            .replace("{network}", &self.network_id)
            .replace("{node}", &self.node_id)
    }

    /// Sink payloads carry an extra provenance input/output pair so the sink
    /// tool can externalize the provenance document next to the data.
    fn append_provenance_side_channel(&self, payload: &mut Payload) {
        payload.inputs.insert(
            "provenance".to_string(),
            ArgumentValue::Flat(vec![format!("vfs://{}/provenance.json", self.id)]),
        );
        let target = match &self.kind {
            JobKind::Sink {
                template,
                write_index,
            } => format!("{}.prov", self.substitute_sink_tokens(template, *write_index)),
            _ => unreachable!("provenance side channel is sink-only"),
        };
        payload
            .outputs
            .insert("provenance".to_string(), ArgumentValue::Flat(vec![target]));
    }

    /// Execute this job synchronously against a tool interface.
    ///
    /// Tool-interface errors propagate to the caller uncaught; the execution
    /// layer is responsible for turning them into a state transition.
    pub fn execute(
        &mut self,
        tool: &dyn ToolInterface,
        ctx: &ExecutionContext,
    ) -> Result<InterfaceResult> {
        match version::check_compatibility(&self.engine_version, &ctx.engine_version, ctx.channel) {
            CompatibilityCheck::Compatible => {}
            CompatibilityCheck::Mismatch {
                severity: Severity::Fatal,
                message,
            } => return Err(EngineError::VersionMismatch(message)),
            CompatibilityCheck::Mismatch {
                severity: Severity::Warning,
                message,
            } => warn!(job = %self.id, "{message}"),
        }

        fs::create_dir_all(&ctx.work_dir)?;

        self.hash_inputs();
        let payload = self.create_payload()?;

        let result = match &self.kind {
            JobKind::Inline { data } => InterfaceResult {
                result_data: data.clone(),
                ..InterfaceResult::default()
            },
            _ => tool.execute(&payload, ctx)?,
        };

        self.errors.extend(result.errors.iter().cloned());
        self.translate_outputs(&result, &ctx.datatypes);
        self.hash_results();
        self.collect_provenance();

        if !self.validate_results(&payload, &result, &ctx.datatypes) {
            return Err(EngineError::InvalidResults {
                job: self.id.clone(),
                problems: self.errors.clone(),
            });
        }

        Ok(result)
    }

    /// Translate raw output values into canonical typed form, trying the
    /// declared datatype first and the preferred list on rejection.
    fn translate_outputs(&mut self, result: &InterfaceResult, datatypes: &DatatypeRegistry) {
        let mut output_data = BTreeMap::new();
        let mut problems = Vec::new();

        for out in &self.outputs {
            if out.automatic {
                continue;
            }
            let Some(raw_values) = result.result_data.get(&out.name) else {
                continue;
            };
            let declared = match &self.kind {
                JobKind::Source => self.sample_datatype.as_deref().unwrap_or(&out.datatype),
                _ => out.datatype.as_str(),
            };

            let mut translated = Vec::with_capacity(raw_values.len());
            for raw in raw_values {
                match datatypes.resolve_raw(raw, declared, &self.preferred_types) {
                    Ok(datum) => translated.push(datum),
                    Err(reasons) => problems.push(format!(
                        "output '{}' value '{}' rejected by all datatypes: {}",
                        out.name,
                        raw,
                        reasons.join("; ")
                    )),
                }
            }
            output_data.insert(out.name.clone(), translated);
        }

        self.output_data = output_data;
        self.errors.extend(problems);
    }

    /// Validate produced outputs against the declarations.
    ///
    /// All problems are collected before returning; there is no
    /// short-circuit. Sink and source jobs instead fail on non-empty stderr.
    pub fn validate_results(
        &mut self,
        payload: &Payload,
        result: &InterfaceResult,
        datatypes: &DatatypeRegistry,
    ) -> bool {
        if matches!(self.kind, JobKind::Sink { .. } | JobKind::Source) {
            if !result.stderr.is_empty() {
                self.errors
                    .push(format!("tool wrote to stderr: {}", result.stderr.trim()));
                return false;
            }
            return true;
        }

        let mut problems = Vec::new();
        let mut valid = true;

        for out in &self.outputs {
            match self.output_data.get(&out.name) {
                None => {
                    if out.required && out.requested {
                        problems.push(format!("required output '{}' was not produced", out.name));
                        valid = false;
                    } else {
                        debug!(job = %self.id, output = %out.name, "optional output not produced");
                    }
                }
                Some(values) => {
                    if !out.automatic {
                        match out.cardinality.resolve(payload) {
                            Ok(expected) if expected != values.len() => {
                                problems.push(format!(
                                    "output '{}' has {} values, expected {}",
                                    out.name,
                                    values.len(),
                                    expected
                                ));
                                valid = false;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                problems.push(e.to_string());
                                valid = false;
                            }
                        }
                    }
                    for datum in values {
                        if !datatypes.datum_is_valid(datum) {
                            problems.push(format!(
                                "output '{}' value '{}' is invalid for datatype '{}'",
                                out.name, datum.value, datum.datatype
                            ));
                            valid = false;
                        }
                    }
                }
            }
        }

        self.errors.extend(problems);
        valid
    }

    /// Compute content checksums of every resolved input value.
    pub fn hash_inputs(&mut self) {
        self.input_hashes.clear();
        for (name, arg) in &self.input_args {
            for (sample, data) in &arg.data {
                for (i, datum) in data.iter().enumerate() {
                    self.input_hashes
                        .insert(format!("{name}/{sample}/{i}"), datum.checksum());
                }
            }
        }
    }

    /// Compute content checksums of produced output values.
    ///
    /// Outputs never produced (e.g. unrequested optional ones) are absent
    /// from `output_data` and therefore skipped.
    pub fn hash_results(&mut self) {
        self.output_hashes.clear();
        for (name, values) in &self.output_data {
            for (i, datum) in values.iter().enumerate() {
                self.output_hashes
                    .insert(format!("{name}/{i}"), datum.checksum());
            }
        }
    }

    fn collect_provenance(&mut self) {
        let mut prov = self
            .provenance
            .take()
            .unwrap_or_else(|| Provenance::init(&self.tool_name, &self.tool_version));
        prov.collect(self.input_hashes.clone());
        self.provenance = Some(prov);
    }

    /// Best-effort, fail-soft lookup of a persisted result for this job.
    ///
    /// Found only if the stored status was `ExecutionDone` and the stored
    /// id, tool name+version, sample id and recomputed payload all match.
    /// Sink jobs always miss: they have external side effects and must
    /// always re-run.
    pub fn get_result(&self, store: &ResultStore) -> Option<StoredJobRecord> {
        if matches!(self.kind, JobKind::Sink { .. }) {
            return None;
        }

        let record = store.load(&self.id)?;

        if record.status != JobState::ExecutionDone {
            debug!(job = %self.id, status = %record.status, "stored result not execution_done; ignoring");
            return None;
        }
        if record.job_id != self.id
            || record.tool_name != self.tool_name
            || record.tool_version != self.tool_version
            || record.sample_id != self.sample_id
        {
            debug!(job = %self.id, "stored result identity mismatch; ignoring");
            return None;
        }

        let payload = self.create_payload().ok()?;
        if record.payload != payload {
            debug!(job = %self.id, "stored result payload differs; ignoring");
            return None;
        }

        Some(record)
    }

    /// Snapshot this job into a persistable record.
    pub fn to_record(&self, payload: Payload) -> StoredJobRecord {
        StoredJobRecord {
            job_id: self.id.clone(),
            tool_name: self.tool_name.clone(),
            tool_version: self.tool_version.clone(),
            sample_id: self.sample_id.clone(),
            status: self.state(),
            payload,
            output_data: self.output_data.clone(),
        }
    }
}
