// src/types.rs

//! Shared identifier types used across the engine.

/// Canonical job identifier: `network__node__sample`, plus a trailing
/// write-index discriminator for sink jobs.
pub type JobId = String;

/// Name of a node in the network template.
pub type NodeId = String;

/// Identifier of a network template / run.
pub type NetworkId = String;

/// Identifier of one concrete data item flowing through a network run.
pub type SampleId = String;
