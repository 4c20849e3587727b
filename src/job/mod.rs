// src/job/mod.rs

//! The job entity and its supporting pieces.
//!
//! - [`core`] holds the `Job` struct itself: identity, history, execution.
//! - [`state`] is the lifecycle state machine.
//! - [`payload`] resolves abstract arguments into concrete payloads.
//! - [`resources`] validates per-job resource requirements.
//! - [`result_store`] is the fail-soft persisted result cache.

pub mod core;
pub mod payload;
pub mod resources;
pub mod result_store;
pub mod state;

pub use core::{HoldSpec, Job, JobKind, JobSpec, Provenance, StatusObserver};
pub use payload::{Argument, ArgumentValue, Cardinality, Payload};
pub use resources::ResourceRequest;
pub use result_store::{ResultStore, StoredJobRecord};
pub use state::{JobState, Stage, StatusRecord};
