// src/job/state.rs

//! Job lifecycle states and the transition table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification of a [`JobState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    InProgress,
    Done,
}

/// Finite lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Nonexistent,
    Created,
    Queued,
    Hold,
    Running,
    ExecutionDone,
    ExecutionFailed,
    ProcessingCallback,
    Finished,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn stage(self) -> Stage {
        use JobState::*;
        match self {
            Nonexistent | Created | Queued | Hold => Stage::Idle,
            Running | ExecutionDone | ExecutionFailed | ProcessingCallback => Stage::InProgress,
            Finished | Failed | Cancelled => Stage::Done,
        }
    }

    /// Whether this state carries an error flag.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            JobState::ExecutionFailed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Terminal states; a job in one of these is resolved.
    pub fn is_terminal(self) -> bool {
        self.stage() == Stage::Done
    }

    /// Legality of a directed transition edge.
    ///
    /// The edge set is acyclic with no backward edges. Same-state "moves" are
    /// handled separately (`Job::set_status` treats them as no-ops before this
    /// check is reached).
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Nonexistent, Created)
                | (Created, Queued)
                | (Created, Hold)
                | (Hold, Queued)
                | (Hold, Cancelled)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Running, ExecutionDone)
                | (Running, ExecutionFailed)
                | (Running, Cancelled)
                | (ExecutionDone, ProcessingCallback)
                | (ExecutionFailed, ProcessingCallback)
                | (ProcessingCallback, Finished)
                | (ProcessingCallback, Failed)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Nonexistent => "nonexistent",
            JobState::Created => "created",
            JobState::Queued => "queued",
            JobState::Hold => "hold",
            JobState::Running => "running",
            JobState::ExecutionDone => "execution_done",
            JobState::ExecutionFailed => "execution_failed",
            JobState::ProcessingCallback => "processing_callback",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One entry in a job's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub at: DateTime<Utc>,
    pub state: JobState,
}

impl StatusRecord {
    pub fn now(state: JobState) -> Self {
        Self {
            at: Utc::now(),
            state,
        }
    }
}
