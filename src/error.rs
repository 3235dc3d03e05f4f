//! Top-level job error
//!
//! Everything a stage can fail with is a [`JobError`]. Recoverable failures
//! are the `Recoverable` variant and only ever appear at the top level;
//! [`classify`] is the one place that produces them from other variants.

use std::error::Error;

use jobflow_protocol::ConditionCode;
use jobflow_recovery::{classify_chain, FailureContext, RecoverableError};

use crate::job::TransitionError;
use crate::ports::StoreError;

type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Errors seen by the worker loop
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Transient failure; the job is parked and retried
    #[error(transparent)]
    Recoverable(#[from] RecoverableError),

    /// Unsupported combination or invalid definition; never retried
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A launch or stage command exited non-zero
    #[error("remote command exited with {exit_code}: {message}")]
    RemoteExecution {
        condition: ConditionCode,
        exit_code: i32,
        message: String,
        /// Remote output captured for diagnostics
        output: String,
    },

    /// Terminal failure with a specific condition code
    #[error("{message}")]
    Failed {
        condition: ConditionCode,
        message: String,
    },

    /// A collaborator call failed; the cause may carry a transient signal
    #[error("{message}")]
    Collaborator {
        condition: ConditionCode,
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("job cancelled")]
    Cancelled,

    #[error("job paused")]
    Paused,

    #[error("job store: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Transition(#[from] TransitionError),
}

impl JobError {
    pub fn failed(condition: ConditionCode, message: impl Into<String>) -> Self {
        JobError::Failed {
            condition,
            message: message.into(),
        }
    }

    pub fn collaborator(
        condition: ConditionCode,
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        JobError::Collaborator {
            condition,
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Condition code recorded when this error ends the job
    pub fn condition(&self) -> ConditionCode {
        match self {
            JobError::Recoverable(_) => ConditionCode::JobRecoveryTimeout,
            JobError::Configuration(_) => ConditionCode::JobInvalidDefinition,
            JobError::RemoteExecution { condition, .. }
            | JobError::Failed { condition, .. }
            | JobError::Collaborator { condition, .. } => *condition,
            JobError::Cancelled => ConditionCode::CancelledByUser,
            JobError::Paused => ConditionCode::JobInternalError,
            JobError::Store(_) => ConditionCode::JobDatabaseError,
            JobError::Transition(_) => ConditionCode::JobInternalError,
        }
    }

    /// Message recorded in `last_message`, including remote output if any
    pub fn last_message(&self) -> String {
        match self {
            JobError::RemoteExecution { output, .. } if !output.is_empty() => {
                format!("{}\n{}", self, output)
            }
            _ => self.to_string(),
        }
    }
}

/// Turn an error into a recoverable one, or give it back if it is permanent.
///
/// An error that is already recoverable is returned unchanged.
pub fn classify(error: JobError, ctx: &FailureContext) -> Result<RecoverableError, JobError> {
    match error {
        JobError::Recoverable(recoverable) => Ok(recoverable),
        JobError::Cancelled | JobError::Paused | JobError::Configuration(_) => Err(error),
        other => match classify_chain(&other, ctx) {
            Some(recoverable) => Ok(recoverable),
            None => Err(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ExecError, TransferClientError};
    use jobflow_recovery::{
        capture::capture_ssh_state, RecoveryCategory, ServiceConnectionError, SshError,
        SshFailureKind,
    };

    fn ctx() -> FailureContext {
        FailureContext {
            tenant: "dev".to_string(),
            owner: "alice".to_string(),
            exec_system_id: "frontera".to_string(),
        }
    }

    #[test]
    fn test_classify_is_idempotent() {
        let original = RecoverableError::new(
            RecoveryCategory::SshTimeout,
            "timed out",
            capture_ssh_state("dev", "frontera", "login", 22, "alice"),
        );
        let once = classify(JobError::Recoverable(original.clone()), &ctx()).unwrap();
        let twice = classify(JobError::Recoverable(once.clone()), &ctx()).unwrap();
        assert_eq!(once, original);
        assert_eq!(twice, original);
    }

    #[test]
    fn test_collaborator_error_with_ssh_cause() {
        let ssh = SshError::new(SshFailureKind::Connection, "login", 22, "alice", "refused");
        let err = JobError::collaborator(
            ConditionCode::JobLaunchFailure,
            "launch failed",
            ExecError::from(ssh),
        );
        let r = classify(err, &ctx()).unwrap();
        assert_eq!(r.category, RecoveryCategory::SshConnection);
    }

    #[test]
    fn test_transfer_connection_is_service_connection() {
        let err = JobError::collaborator(
            ConditionCode::JobTransferMonitoringTimeout,
            "transfer polling failed",
            TransferClientError::from(ServiceConnectionError::new("files", "reset")),
        );
        let r = classify(err, &ctx()).unwrap();
        assert_eq!(r.category, RecoveryCategory::ServiceConnection);
        assert_eq!(r.state["service"], "files");
    }

    #[test]
    fn test_configuration_errors_stay_permanent() {
        let err = classify(JobError::Configuration("bad".to_string()), &ctx()).unwrap_err();
        assert_eq!(err.condition(), ConditionCode::JobInvalidDefinition);
    }

    #[test]
    fn test_remote_execution_message_includes_output() {
        let err = JobError::RemoteExecution {
            condition: ConditionCode::JobLaunchFailure,
            exit_code: 1,
            message: "sbatch failed".to_string(),
            output: "sbatch: error: invalid partition".to_string(),
        };
        assert!(classify(
            JobError::RemoteExecution {
                condition: ConditionCode::JobLaunchFailure,
                exit_code: 1,
                message: String::new(),
                output: String::new(),
            },
            &ctx()
        )
        .is_err());
        assert!(err.last_message().contains("invalid partition"));
    }
}
