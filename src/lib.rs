// src/lib.rs

//! flowrun: a sample-parallel workflow execution engine.
//!
//! A workflow is a directed acyclic network of nodes. Source nodes inject
//! per-sample data, step nodes run tools against it, sink nodes externalize
//! results. A [`network::NetworkRun`] drives one execution: a job generator
//! lazily turns ready samples into [`job::Job`]s, an execution backend runs
//! them, and completion signals flow back over a channel for result
//! publication and failure propagation.
//!
//! The engine is embeddable: tools, datatypes and backends are all registered
//! by the host application through the [`tool::ToolRegistry`],
//! [`data::DatatypeRegistry`] and [`exec::BackendRegistry`] seams.

pub mod data;
pub mod errors;
pub mod exec;
pub mod job;
pub mod logging;
pub mod network;
pub mod tool;
pub mod types;
pub mod version;

pub use data::{DatatypeRegistry, Datum, FailedAnnotation};
pub use errors::{EngineError, Result};
pub use exec::{BackendContext, BackendRegistry, BackendSignal, ExecutionBackend};
pub use job::{Job, JobKind, JobSpec, JobState, ResultStore};
pub use network::{NetworkDefinition, NetworkRun, NodeDefinition, NodeKind, RunOptions, RunReport};
pub use tool::{ExecutionContext, InterfaceResult, OutputSpec, ToolInterface, ToolRegistry, ToolSpec};
pub use version::{Channel, ENGINE_VERSION};
