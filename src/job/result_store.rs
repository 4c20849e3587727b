// src/job/result_store.rs

//! Fail-soft persistence of finished job results.
//!
//! Records are JSON files keyed by job id under a store root. Loading is
//! best-effort: any IO or deserialization failure surfaces as "not found",
//! never as an error, so a corrupt cache entry just means the work is redone.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::Datum;
use crate::errors::Result;
use crate::job::payload::Payload;
use crate::job::state::JobState;
use crate::types::{JobId, SampleId};

/// The persisted snapshot of one executed job, used both as the cache record
/// and the replay artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredJobRecord {
    pub job_id: JobId,
    pub tool_name: String,
    pub tool_version: String,
    pub sample_id: SampleId,
    pub status: JobState,
    pub payload: Payload,
    pub output_data: BTreeMap<String, Vec<Datum>>,
}

/// On-disk store of [`StoredJobRecord`]s.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{job_id}.json"))
    }

    /// Load the record for a job id, if a readable one exists.
    pub fn load(&self, job_id: &str) -> Option<StoredJobRecord> {
        let path = self.path_for(job_id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                debug!(job = %job_id, error = %e, "no stored result");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(job = %job_id, path = %path.display(), error = %e, "stored result unreadable; ignoring");
                None
            }
        }
    }

    /// Persist a record, overwriting any previous one for the same job id.
    pub fn save(&self, record: &StoredJobRecord) -> Result<()> {
        let path = self.path_for(&record.job_id);
        let bytes = serde_json::to_vec_pretty(record)?;
        fs::write(&path, bytes)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
