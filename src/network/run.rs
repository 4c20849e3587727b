// src/network/run.rs

//! The per-run orchestrator.
//!
//! A [`NetworkRun`] pairs a network definition with live per-node state and
//! drives one execution: bind source/sink data, snapshot the run inputs to
//! the workspace, then alternate between pulling a batch from the job
//! generator and draining the backend's completion signals. All job
//! finalization and result publication happens here, on the orchestrator's
//! own task.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::data::{DatatypeRegistry, FailedAnnotation};
use crate::errors::{EngineError, Result};
use crate::exec::backend::{
    BackendContext, BackendRegistry, BackendSignal, ExecutionBackend, SIGNAL_CHANNEL_CAPACITY,
};
use crate::job::core::{Job, StatusObserver};
use crate::job::result_store::ResultStore;
use crate::job::state::JobState;
use crate::network::chunker::{NetworkAnalyzer, NetworkChunker, SingleChunker, TopologicalAnalyzer};
use crate::network::generate::JobGenerator;
use crate::network::graph::NetworkGraph;
use crate::network::node::{NetworkDefinition, Node, NodeKind};
use crate::network::report::{RunReport, SampleOutcome, SinkReport};
use crate::tool::ToolRegistry;
use crate::types::{NodeId, SampleId};
use crate::version::Channel;

/// How long the drain loop waits for a signal before rechecking state.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-run execution options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub backend: String,
    /// Run workspace; snapshots, per-job work dirs and the sink report land
    /// under it.
    pub work_dir: PathBuf,
    pub channel: Channel,
    /// Directory of the persisted result cache; `None` disables caching.
    pub cache_dir: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: "local".to_string(),
            work_dir: work_dir.into(),
            channel: Channel::default(),
            cache_dir: None,
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}

/// Cloneable handle for aborting a run from another task.
#[derive(Clone)]
pub struct AbortHandle {
    executing: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Request a cooperative stop: no new jobs are generated or started,
    /// in-flight jobs run to completion.
    pub fn abort(&self) {
        if self.executing.swap(false, Ordering::SeqCst) {
            info!("run abort requested");
        }
    }
}

pub struct NetworkRun {
    definition: NetworkDefinition,
    graph: NetworkGraph,
    nodes: HashMap<NodeId, Node>,
    sink_outcomes: BTreeMap<NodeId, BTreeMap<SampleId, SampleOutcome>>,
    executing: Arc<AtomicBool>,
    nested: bool,
    observer: Option<StatusObserver>,
    datatypes: Arc<DatatypeRegistry>,
    chunker: Box<dyn NetworkChunker>,
    analyzer: Box<dyn NetworkAnalyzer>,
}

impl NetworkRun {
    pub fn new(definition: NetworkDefinition, datatypes: Arc<DatatypeRegistry>) -> Result<Self> {
        let graph = NetworkGraph::from_definition(&definition)?;
        let nodes = definition
            .nodes
            .iter()
            .map(|def| (def.id.clone(), Node::new(def.clone())))
            .collect();

        Ok(Self {
            definition,
            graph,
            nodes,
            sink_outcomes: BTreeMap::new(),
            executing: Arc::new(AtomicBool::new(false)),
            nested: false,
            observer: None,
            datatypes,
            chunker: Box::new(SingleChunker),
            analyzer: Box::new(TopologicalAnalyzer),
        })
    }

    /// Install a synchronous observer invoked on every job status change.
    pub fn with_observer(mut self, observer: StatusObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Mark this run as nested under a parent orchestration. Sink nodes are
    /// skipped; the parent consumes the results instead.
    pub fn nested_under(mut self) -> Self {
        self.nested = true;
        self
    }

    pub fn with_chunker(mut self, chunker: Box<dyn NetworkChunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Box<dyn NetworkAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            executing: self.executing.clone(),
        }
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Execute the network once.
    ///
    /// `source_data` must bind every source node; `sink_data` must bind every
    /// sink node without a definition-level template (unless nested). Returns
    /// the run report; scheduling-level errors abort the run and propagate.
    pub async fn execute(
        &mut self,
        source_data: BTreeMap<NodeId, BTreeMap<SampleId, Vec<String>>>,
        sink_data: BTreeMap<NodeId, String>,
        backends: &BackendRegistry,
        tools: Arc<ToolRegistry>,
        opts: RunOptions,
    ) -> Result<RunReport> {
        self.executing.store(true, Ordering::SeqCst);
        self.sink_outcomes.clear();

        info!(
            network = %self.definition.id,
            backend = %opts.backend,
            nested = self.nested,
            "starting network run"
        );

        let setup = self.prepare(&source_data, &sink_data, &opts);
        let result = match setup {
            Ok(store) => self.drive(backends, tools, &opts, store).await,
            Err(e) => Err(e),
        };

        // swap() tells apart a normal finish from an abort mid-run.
        let aborted = !self.executing.swap(false, Ordering::SeqCst);
        let report = self.summarize(aborted);

        if let Err(e) = report.write_json(&opts.work_dir.join("sink_report.json")) {
            warn!(error = %e, "failed to write sink report");
        }

        result?;
        Ok(report)
    }

    /// Create the workspace, snapshot the run inputs and bind source/sink
    /// data. Snapshots are written before any job is scheduled.
    fn prepare(
        &mut self,
        source_data: &BTreeMap<NodeId, BTreeMap<SampleId, Vec<String>>>,
        sink_data: &BTreeMap<NodeId, String>,
        opts: &RunOptions,
    ) -> Result<Option<ResultStore>> {
        fs::create_dir_all(&opts.work_dir)?;
        fs::write(
            opts.work_dir.join("definition.json"),
            serde_json::to_vec_pretty(&self.definition)?,
        )?;
        fs::write(
            opts.work_dir.join("source_data.json"),
            serde_json::to_vec_pretty(source_data)?,
        )?;

        for (id, data) in source_data {
            let node = self
                .nodes
                .get_mut(id)
                .ok_or_else(|| EngineError::NodeNotFound(id.clone()))?;
            if node.kind() != NodeKind::Source {
                return Err(EngineError::ConfigError(format!(
                    "source data bound to non-source node '{id}'"
                )));
            }
            node.bind_source(data.clone());
        }
        for (id, target) in sink_data {
            let node = self
                .nodes
                .get_mut(id)
                .ok_or_else(|| EngineError::NodeNotFound(id.clone()))?;
            if node.kind() != NodeKind::Sink {
                return Err(EngineError::ConfigError(format!(
                    "sink target bound to non-sink node '{id}'"
                )));
            }
            node.bind_sink(target.clone());
        }

        for node in self.nodes.values() {
            match node.kind() {
                NodeKind::Source if node.source_data.is_none() => {
                    return Err(EngineError::MissingBinding {
                        kind: "source",
                        node: node.id().to_string(),
                    });
                }
                NodeKind::Sink if !self.nested && node.sink_template().is_none() => {
                    return Err(EngineError::MissingBinding {
                        kind: "sink",
                        node: node.id().to_string(),
                    });
                }
                _ => {}
            }
        }

        match &opts.cache_dir {
            Some(dir) => Ok(Some(ResultStore::open(dir)?)),
            None => Ok(None),
        }
    }

    async fn drive(
        &mut self,
        backends: &BackendRegistry,
        tools: Arc<ToolRegistry>,
        opts: &RunOptions,
        result_store: Option<ResultStore>,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let ctx = BackendContext {
            signals: tx,
            tools,
            datatypes: self.datatypes.clone(),
            work_root: opts.work_dir.join("work"),
            result_store,
            channel: opts.channel,
            executing: self.executing.clone(),
        };
        let mut backend = backends.create(&opts.backend, ctx)?;

        let mut generator = JobGenerator::new(
            self.definition.id.clone(),
            &self.graph,
            &self.nodes,
            self.chunker.as_mut(),
            self.analyzer.as_ref(),
            self.nested,
            self.executing.clone(),
            self.observer.clone(),
        )?;

        while let Some(batch) = generator.next_batch(&self.nodes)? {
            debug!(jobs = batch.len(), "queueing job batch");
            for job in batch {
                backend.queue_job(job).await?;
            }
            self.drain(backend.as_mut(), &mut rx).await;
        }

        // One final drain: nothing is in flight after the last batch, but a
        // late signal may still sit in the channel.
        self.drain(backend.as_mut(), &mut rx).await;
        Ok(())
    }

    /// Wait for every queued job to signal completion, publishing results as
    /// they come in.
    async fn drain(
        &mut self,
        backend: &mut dyn ExecutionBackend,
        rx: &mut mpsc::Receiver<BackendSignal>,
    ) {
        while backend.pending() > 0 {
            match timeout(POLL_INTERVAL, rx.recv()).await {
                Ok(Some(signal)) => self.handle_signal(signal),
                Ok(None) => break,
                // Timeout: recheck pending; in-flight jobs finish even when
                // the run was aborted.
                Err(_) => {}
            }
        }
        while let Ok(signal) = rx.try_recv() {
            self.handle_signal(signal);
        }
    }

    fn handle_signal(&mut self, signal: BackendSignal) {
        match signal {
            BackendSignal::StatusChanged(job_id, state) => {
                debug!(job = %job_id, state = %state, "job progress");
            }
            BackendSignal::Finished(job) | BackendSignal::Cancelled(job) => {
                self.job_finished(*job);
            }
        }
    }

    /// Finalize a completed job and publish its result to the owning node.
    fn job_finished(&mut self, mut job: Job) {
        // Upstream failures ride in on the input data's annotations.
        let mut seen = BTreeSet::new();
        let upstream: Vec<FailedAnnotation> = job
            .input_args
            .values()
            .flat_map(|arg| arg.data.values())
            .flatten()
            .flat_map(|datum| datum.annotations.iter())
            .filter(|ann| seen.insert(ann.job_id.clone()))
            .cloned()
            .collect();

        let target = match job.state() {
            JobState::ExecutionDone => Some(JobState::Finished),
            JobState::ExecutionFailed => Some(JobState::Failed),
            _ => None,
        };
        if let Some(target) = target {
            if let Err(e) = job.set_status(JobState::ProcessingCallback) {
                warn!(job = %job.id(), error = %e, "could not enter callback state");
            }
            if let Err(e) = job.set_status(target) {
                warn!(job = %job.id(), error = %e, "could not finalize job state");
            }
        }

        let mut failed = upstream.clone();
        if job.state().is_error() {
            failed.push(FailedAnnotation {
                job_id: job.id().to_string(),
                state: job.state(),
                message: job.errors.join("; "),
                log_path: format!("logs/{}.log", job.id()),
            });
        }

        let Some(node) = self.nodes.get_mut(&job.node_id) else {
            warn!(job = %job.id(), node = %job.node_id, "finished job for unknown node");
            return;
        };
        let is_sink = node.kind() == NodeKind::Sink;
        node.set_result(&job, failed);

        if is_sink {
            self.record_sink_outcome(&job, &upstream);
        }
    }

    /// Record a sink write in the run summary. A sample fails when its sink
    /// job errored or when any input carried a failed annotation, regardless
    /// of what the backend did with the job. Multiple writes for the same
    /// sample collapse into one outcome; a failure always wins the merge.
    fn record_sink_outcome(&mut self, job: &Job, upstream: &[FailedAnnotation]) {
        let mut errors = job.errors.clone();
        errors.extend(upstream.iter().map(|ann| {
            format!("upstream failure from {}: {}", ann.job_id, ann.message)
        }));
        let outcome = SampleOutcome {
            job_id: job.id().to_string(),
            state: job.state(),
            errors,
        };
        let samples = self.sink_outcomes.entry(job.node_id.clone()).or_default();
        match samples.get(&job.sample_id) {
            Some(existing) if !existing.succeeded() => {}
            _ => {
                samples.insert(job.sample_id.clone(), outcome);
            }
        }
    }

    fn summarize(&self, aborted: bool) -> RunReport {
        let mut sinks = Vec::new();
        for node in self.nodes.values() {
            if node.kind() != NodeKind::Sink || self.nested {
                continue;
            }
            let samples = self
                .sink_outcomes
                .get(node.id())
                .cloned()
                .unwrap_or_default();
            let report = SinkReport::new(node.id().to_string(), samples);
            info!(
                sink = %report.node,
                succeeded = report.succeeded,
                failed = report.failed,
                "sink summary"
            );
            sinks.push(report);
        }
        sinks.sort_by(|a, b| a.node.cmp(&b.node));

        RunReport {
            network: self.definition.id.clone(),
            sinks,
            aborted,
        }
    }
}
