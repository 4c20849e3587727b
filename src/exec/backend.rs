// src/exec/backend.rs

//! Execution backend abstraction.
//!
//! A backend accepts jobs and reports their completion asynchronously over a
//! bounded signal channel owned by the orchestrator. The channel replaces
//! direct callbacks: all result publication happens on the orchestrator's own
//! task, so backends never touch run state concurrently.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::mpsc;

use crate::data::DatatypeRegistry;
use crate::errors::{EngineError, Result};
use crate::exec::local::LocalBackend;
use crate::job::core::Job;
use crate::job::result_store::ResultStore;
use crate::job::state::JobState;
use crate::tool::ToolRegistry;
use crate::types::JobId;
use crate::version::Channel;

/// Capacity of the backend-to-orchestrator signal channel.
pub const SIGNAL_CHANNEL_CAPACITY: usize = 256;

/// Completion and progress signals a backend sends to the orchestrator.
#[derive(Debug)]
pub enum BackendSignal {
    /// The job reached `ExecutionDone` or `ExecutionFailed`; the orchestrator
    /// finalizes it and publishes its result.
    Finished(Box<Job>),
    /// The job was dropped before running because the run was aborted.
    Cancelled(Box<Job>),
    /// Informational state change for a job still in flight.
    StatusChanged(JobId, JobState),
}

/// Everything a backend needs to execute jobs for one run.
#[derive(Clone)]
pub struct BackendContext {
    pub signals: mpsc::Sender<BackendSignal>,
    pub tools: Arc<ToolRegistry>,
    pub datatypes: Arc<DatatypeRegistry>,
    /// Root under which per-job working directories are created.
    pub work_root: PathBuf,
    /// Persisted result cache; `None` disables caching entirely.
    pub result_store: Option<ResultStore>,
    pub channel: Channel,
    /// Cleared when the run is aborted; backends stop starting new work.
    pub executing: Arc<AtomicBool>,
}

/// Contract between the orchestrator and a job execution strategy.
pub trait ExecutionBackend: Send {
    /// Accept a job for execution.
    ///
    /// Queueing only fails when the backend itself is unusable; job-level
    /// failures are reported through the signal channel instead.
    fn queue_job(&mut self, job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Jobs accepted but not yet signalled as finished or cancelled.
    fn pending(&self) -> usize;
}

type BackendFactory =
    Box<dyn Fn(BackendContext) -> Result<Box<dyn ExecutionBackend>> + Send + Sync>;

/// Named backend factories available to runs.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// A registry with the built-in `local` backend pre-registered.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("local", |ctx| {
            Ok(Box::new(LocalBackend::new(ctx)) as Box<dyn ExecutionBackend>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(BackendContext) -> Result<Box<dyn ExecutionBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn create(&self, name: &str, ctx: BackendContext) -> Result<Box<dyn ExecutionBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| EngineError::UnknownBackend(name.to_string()))?;
        factory(ctx)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}
