// src/exec/mod.rs

//! Job execution: the backend seam and the built-in local backend.

pub mod backend;
pub mod local;

pub use backend::{
    BackendContext, BackendRegistry, BackendSignal, ExecutionBackend, SIGNAL_CHANNEL_CAPACITY,
};
pub use local::LocalBackend;
