// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::job::state::JobState;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("No data bound for declared {kind} node '{node}'")]
    MissingBinding { kind: &'static str, node: String },

    #[error("Unknown execution backend: {0}")]
    UnknownBackend(String),

    #[error("Cycle detected in network: {0}")]
    NetworkCycle(String),

    #[error("Illegal job state transition: {from:?} -> {to:?}")]
    IllegalTransition { from: JobState, to: JobState },

    #[error("Cannot resolve cardinality reference '{0}'")]
    UnresolvableCardinality(String),

    #[error("Invalid resource request: {0}")]
    InvalidResource(String),

    #[error("Engine version mismatch: {0}")]
    VersionMismatch(String),

    #[error("Job '{job}' produced invalid results: {problems:?}")]
    InvalidResults { job: String, problems: Vec<String> },

    #[error("Tool '{tool}' failed for job '{job}': {message}")]
    ToolFailure {
        tool: String,
        job: String,
        message: String,
    },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;
