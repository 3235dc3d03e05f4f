//! Condition codes recorded on a job when it stops for a reason other than
//! normal completion, or when a stage hits a notable condition.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Most specific known reason for a job stopping or stalling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionCode {
    /// Job ran to completion
    NormalCompletion,
    /// Cancelled through an async command
    CancelledByUser,
    /// Job definition cannot run on the selected system
    JobInvalidDefinition,
    /// Unexpected internal failure
    JobInternalError,
    /// Remote command execution failed permanently
    JobRemoteAccessError,
    /// Input staging could not complete
    JobUnableToStageInputs,
    /// Wrapper script installation failed
    JobUnableToStageJob,
    /// Submission to the remote runtime failed
    JobLaunchFailure,
    /// A transfer reported FAILED or CANCELLED
    JobTransferFailedOrCancelled,
    /// Transfer polling ran out of retries
    JobTransferMonitoringTimeout,
    /// Remote job polling ran out of retries
    JobExecutionMonitoringTimeout,
    /// Remote job status could not be obtained or understood
    JobExecutionMonitoringError,
    /// The application exited with a failure
    JobRemoteOutcomeError,
    /// Output archiving failed
    JobArchivingFailed,
    /// Recovery policy expired before the condition cleared
    JobRecoveryTimeout,
    /// Job store read or write failed
    JobDatabaseError,
}

impl ConditionCode {
    /// Stable upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionCode::NormalCompletion => "NORMAL_COMPLETION",
            ConditionCode::CancelledByUser => "CANCELLED_BY_USER",
            ConditionCode::JobInvalidDefinition => "JOB_INVALID_DEFINITION",
            ConditionCode::JobInternalError => "JOB_INTERNAL_ERROR",
            ConditionCode::JobRemoteAccessError => "JOB_REMOTE_ACCESS_ERROR",
            ConditionCode::JobUnableToStageInputs => "JOB_UNABLE_TO_STAGE_INPUTS",
            ConditionCode::JobUnableToStageJob => "JOB_UNABLE_TO_STAGE_JOB",
            ConditionCode::JobLaunchFailure => "JOB_LAUNCH_FAILURE",
            ConditionCode::JobTransferFailedOrCancelled => "JOB_TRANSFER_FAILED_OR_CANCELLED",
            ConditionCode::JobTransferMonitoringTimeout => "JOB_TRANSFER_MONITORING_TIMEOUT",
            ConditionCode::JobExecutionMonitoringTimeout => "JOB_EXECUTION_MONITORING_TIMEOUT",
            ConditionCode::JobExecutionMonitoringError => "JOB_EXECUTION_MONITORING_ERROR",
            ConditionCode::JobRemoteOutcomeError => "JOB_REMOTE_OUTCOME_ERROR",
            ConditionCode::JobArchivingFailed => "JOB_ARCHIVING_FAILED",
            ConditionCode::JobRecoveryTimeout => "JOB_RECOVERY_TIMEOUT",
            ConditionCode::JobDatabaseError => "JOB_DATABASE_ERROR",
        }
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_matches_as_str() {
        for code in [
            ConditionCode::JobTransferFailedOrCancelled,
            ConditionCode::JobRecoveryTimeout,
            ConditionCode::CancelledByUser,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}
