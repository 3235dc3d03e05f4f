//! Job lifecycle states.
//!
//! PENDING → PROCESSING_INPUTS → STAGING_INPUTS → STAGING_JOB → SUBMITTING_JOB
//! → QUEUED → RUNNING → ARCHIVING → FINISHED, with FAILED and CANCELLED as
//! terminal exits and BLOCKED as the parking state for recovery.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParseError;

/// Job status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, not yet picked up by a worker
    Pending,
    /// Systems and app are being resolved and checked
    ProcessingInputs,
    /// Input files are being transferred to the execution system
    StagingInputs,
    /// Wrapper script and auxiliary files are being installed
    StagingJob,
    /// The job is being handed to the remote runtime or scheduler
    SubmittingJob,
    /// Submitted, waiting in the remote queue
    Queued,
    /// Executing on the remote system
    Running,
    /// Outputs are being transferred to the archive system
    Archiving,
    /// Parked for recovery; re-enters at the stage it left
    Blocked,
    /// Completed normally
    Finished,
    /// Failed permanently
    Failed,
    /// Cancelled by an operator or the owner
    Cancelled,
}

/// Forward ordering of the active stages.
const ORDER: &[JobStatus] = &[
    JobStatus::Pending,
    JobStatus::ProcessingInputs,
    JobStatus::StagingInputs,
    JobStatus::StagingJob,
    JobStatus::SubmittingJob,
    JobStatus::Queued,
    JobStatus::Running,
    JobStatus::Archiving,
    JobStatus::Finished,
];

impl JobStatus {
    /// Position in the forward ordering, `None` for BLOCKED, FAILED and CANCELLED.
    pub fn ordinal(&self) -> Option<usize> {
        ORDER.iter().position(|s| s == self)
    }

    /// Check if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Check if the job is somewhere between PENDING and ARCHIVING
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != JobStatus::Blocked
    }

    /// Whether a job in this state has been handed to the remote system and
    /// may hold a remote job id.
    pub fn is_remote(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    /// Check if transition from this state to `target` is valid.
    ///
    /// BLOCKED is reported as able to return to any active stage; the job
    /// record narrows that to the stage it was parked from.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }

        match target {
            JobStatus::Failed | JobStatus::Cancelled => true,
            JobStatus::Blocked => *self != JobStatus::Blocked,
            _ => match (self.ordinal(), target.ordinal()) {
                (Some(from), Some(to)) => to > from,
                // Leaving BLOCKED
                (None, Some(_)) => target != JobStatus::Finished,
                _ => false,
            },
        }
    }

    /// Stable upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::ProcessingInputs => "PROCESSING_INPUTS",
            JobStatus::StagingInputs => "STAGING_INPUTS",
            JobStatus::StagingJob => "STAGING_JOB",
            JobStatus::SubmittingJob => "SUBMITTING_JOB",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Archiving => "ARCHIVING",
            JobStatus::Blocked => "BLOCKED",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ORDER
            .iter()
            .chain([JobStatus::Blocked, JobStatus::Failed, JobStatus::Cancelled].iter())
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| ParseError::JobStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::ProcessingInputs));
        assert!(JobStatus::SubmittingJob.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        // Monitor may observe completion before ever seeing the job run
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Archiving));
        assert!(JobStatus::Archiving.can_transition_to(JobStatus::Finished));
    }

    #[test]
    fn test_no_backward_transitions() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::StagingJob.can_transition_to(JobStatus::StagingInputs));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        for terminal in [JobStatus::Finished, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(JobStatus::Failed));
            assert!(!terminal.can_transition_to(JobStatus::Blocked));
            assert!(!terminal.can_transition_to(JobStatus::Pending));
        }
    }

    #[test]
    fn test_blocked_transitions() {
        assert!(JobStatus::SubmittingJob.can_transition_to(JobStatus::Blocked));
        assert!(!JobStatus::Blocked.can_transition_to(JobStatus::Blocked));
        assert!(JobStatus::Blocked.can_transition_to(JobStatus::SubmittingJob));
        assert!(JobStatus::Blocked.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Blocked.can_transition_to(JobStatus::Finished));
        assert!(!JobStatus::Blocked.is_active());
    }

    #[test]
    fn test_round_trip_names() {
        assert_eq!("SUBMITTING_JOB".parse::<JobStatus>().unwrap(), JobStatus::SubmittingJob);
        assert_eq!("blocked".parse::<JobStatus>().unwrap(), JobStatus::Blocked);
        assert!("DONE".parse::<JobStatus>().is_err());

        let json = serde_json::to_string(&JobStatus::StagingInputs).unwrap();
        assert_eq!(json, "\"STAGING_INPUTS\"");
    }
}
