//! Canonical remote job states reported by the monitor family.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical status of a job on the remote runtime or scheduler.
///
/// Every target-native state resolves to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteJobStatus {
    /// Waiting to run
    Queued,
    /// Executing
    Active,
    /// Finished without a reported failure
    Done,
    /// Finished with a failure
    Failed,
    /// The remote system has no record of the job
    Empty,
    /// Status could not be obtained
    Null,
}

impl RemoteJobStatus {
    /// Whether monitoring should stop
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteJobStatus::Done | RemoteJobStatus::Failed)
    }

    /// EMPTY and NULL say nothing about the job's progress
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, RemoteJobStatus::Empty | RemoteJobStatus::Null)
    }

    /// Stable upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteJobStatus::Queued => "QUEUED",
            RemoteJobStatus::Active => "ACTIVE",
            RemoteJobStatus::Done => "DONE",
            RemoteJobStatus::Failed => "FAILED",
            RemoteJobStatus::Empty => "EMPTY",
            RemoteJobStatus::Null => "NULL",
        }
    }
}

impl fmt::Display for RemoteJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the remote execution as recorded on the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteOutcome {
    Finished,
    Failed,
    /// Failed and the job asked not to archive on application error
    FailedSkipArchive,
}
