// src/tool.rs

//! The tool interface seam.
//!
//! The engine never inspects what a tool actually does; it hands a resolved
//! [`Payload`] to a [`ToolInterface`] and gets raw result values, log lines
//! and errors back. Production deployments register their own interfaces in
//! a [`ToolRegistry`]; tests use closures or small structs.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::DatatypeRegistry;
use crate::errors::Result;
use crate::job::payload::{Cardinality, Payload};
use crate::version::Channel;

/// Declaration of one tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub datatype: String,
    /// Whether a missing value is an error.
    pub required: bool,
    /// Whether any downstream link asks for this output.
    pub requested: bool,
    /// Automatic outputs are engine-determined flags, not value lists.
    pub automatic: bool,
    pub cardinality: Cardinality,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datatype: datatype.into(),
            required: true,
            requested: true,
            automatic: false,
            cardinality: Cardinality::default(),
        }
    }
}

/// Identity and output declarations of a tool, as referenced by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub version: String,
    pub outputs: Vec<OutputSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            outputs: Vec::new(),
        }
    }

    /// Registry key for this tool: `name/version`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

/// Raw result of one synchronous tool invocation.
#[derive(Debug, Clone, Default)]
pub struct InterfaceResult {
    /// Raw output values per declared output name, prior to datatype
    /// coercion.
    pub result_data: BTreeMap<String, Vec<String>>,
    pub log: Vec<String>,
    pub errors: Vec<String>,
    pub stdout: String,
    pub stderr: String,
}

/// Ambient context a backend provides for one job execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Job-private working directory, created before the tool runs.
    pub work_dir: PathBuf,
    /// Version of the engine performing the execution.
    pub engine_version: String,
    pub channel: Channel,
    pub datatypes: Arc<DatatypeRegistry>,
}

/// Contract between the engine and an executable tool.
pub trait ToolInterface: Send + Sync {
    /// Execute the tool synchronously against a resolved payload.
    ///
    /// Errors propagate to the caller uncaught; the execution layer turns
    /// them into a job state transition.
    fn execute(&self, payload: &Payload, ctx: &ExecutionContext) -> Result<InterfaceResult>;
}

/// Blanket impl so tests can register plain closures as tools.
impl<F> ToolInterface for F
where
    F: Fn(&Payload, &ExecutionContext) -> Result<InterfaceResult> + Send + Sync,
{
    fn execute(&self, payload: &Payload, ctx: &ExecutionContext) -> Result<InterfaceResult> {
        self(payload, ctx)
    }
}

/// Tools known to this deployment, keyed by `name/version`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolInterface>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, version: &str, tool: Arc<dyn ToolInterface>) {
        self.tools.insert(format!("{name}/{version}"), tool);
    }

    pub fn get(&self, name: &str, version: &str) -> Option<Arc<dyn ToolInterface>> {
        self.tools.get(&format!("{name}/{version}")).cloned()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}
