// src/job/resources.rs

//! Per-job resource requirements.
//!
//! Formats follow the conventions of batch schedulers: memory as `\d+[mMgG]`,
//! wall time as `HH:MM:SS`, `MM:SS` or a bare number of seconds.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};

static MEMORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[mMgG]$").expect("memory regex"));

static WALL_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+:)?\d{1,2}:\d{2}$|^\d+$").expect("wall time regex"));

/// Resource requirements attached to a job, all optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    cores: Option<u32>,
    memory: Option<String>,
    wall_time: Option<String>,
}

impl ResourceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cores(mut self, cores: u32) -> Result<Self> {
        if cores == 0 {
            return Err(EngineError::InvalidResource(
                "cores must be a positive integer".to_string(),
            ));
        }
        self.cores = Some(cores);
        Ok(self)
    }

    pub fn with_memory(mut self, memory: &str) -> Result<Self> {
        if !MEMORY_RE.is_match(memory) {
            return Err(EngineError::InvalidResource(format!(
                "memory '{memory}' does not match \\d+[mMgG]"
            )));
        }
        self.memory = Some(memory.to_string());
        Ok(self)
    }

    pub fn with_wall_time(mut self, wall_time: &str) -> Result<Self> {
        if !WALL_TIME_RE.is_match(wall_time) {
            return Err(EngineError::InvalidResource(format!(
                "wall time '{wall_time}' is not HH:MM:SS, MM:SS or seconds"
            )));
        }
        self.wall_time = Some(wall_time.to_string());
        Ok(self)
    }

    pub fn cores(&self) -> Option<u32> {
        self.cores
    }

    pub fn memory(&self) -> Option<&str> {
        self.memory.as_deref()
    }

    pub fn wall_time(&self) -> Option<&str> {
        self.wall_time.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_cores_rejected() {
        assert!(ResourceRequest::new().with_cores(0).is_err());
        assert!(ResourceRequest::new().with_cores(4).is_ok());
    }

    #[test]
    fn memory_format() {
        for ok in ["512m", "2G", "16g", "1024M"] {
            assert!(ResourceRequest::new().with_memory(ok).is_ok(), "{ok}");
        }
        for bad in ["2GB", "m512", "2.5G", ""] {
            assert!(ResourceRequest::new().with_memory(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn wall_time_format() {
        for ok in ["01:30:00", "30:00", "3600", "1:05:30"] {
            assert!(ResourceRequest::new().with_wall_time(ok).is_ok(), "{ok}");
        }
        for bad in ["1h", "90 min", "01:30:00:00", ""] {
            assert!(ResourceRequest::new().with_wall_time(bad).is_err(), "{bad}");
        }
    }
}
