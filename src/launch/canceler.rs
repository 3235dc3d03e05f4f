//! Remote job cancellation
//!
//! Cancellation is best effort: failures are logged and the job still
//! reaches CANCELLED.

use tracing::{info, warn};

use super::script::shell_quote;
use crate::job::Job;
use crate::ports::RemoteExecutor;

pub trait Canceler: Send + Sync {
    fn cancel_command(&self, remote_job_id: &str) -> String;

    /// Stop the remote job if one was launched
    fn cancel(&self, executor: &dyn RemoteExecutor, job: &Job) {
        let Some(remote_id) = job.remote_job_id() else {
            return;
        };
        let command = self.cancel_command(remote_id);
        match executor.execute(&command) {
            Ok(out) if out.success() => {
                info!(job = %job.uuid, remote_job_id = %remote_id, "remote job cancelled");
            }
            Ok(out) => {
                warn!(
                    job = %job.uuid,
                    exit_code = out.exit_code,
                    output = %out.output.trim(),
                    "remote cancel command failed"
                );
            }
            Err(e) => {
                warn!(job = %job.uuid, error = %e, "unable to cancel remote job");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DockerCanceler;

impl Canceler for DockerCanceler {
    fn cancel_command(&self, remote_job_id: &str) -> String {
        format!("docker rm -f {}", shell_quote(remote_job_id))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InstanceCanceler;

impl Canceler for InstanceCanceler {
    fn cancel_command(&self, remote_job_id: &str) -> String {
        format!("singularity instance stop {}", shell_quote(remote_job_id))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackgroundCanceler;

impl Canceler for BackgroundCanceler {
    fn cancel_command(&self, remote_job_id: &str) -> String {
        format!("kill {}", shell_quote(remote_job_id))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SlurmCanceler;

impl Canceler for SlurmCanceler {
    fn cancel_command(&self, remote_job_id: &str) -> String {
        format!("scancel {}", shell_quote(remote_job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailureConfig, MockOp, ScriptedExecutor};
    use chrono::Utc;
    use jobflow_recovery::SshFailureKind;

    fn job() -> Job {
        Job::new("dev", "alice", "sim", "1.0", "frontera", Utc::now())
    }

    #[test]
    fn test_no_remote_id_is_noop() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        SlurmCanceler.cancel(&exec, &job());
        assert!(exec.commands().is_empty());
    }

    #[test]
    fn test_cancel_runs_command() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        let mut j = job();
        j.assign_remote_job_id("4242").unwrap();

        SlurmCanceler.cancel(&exec, &j);
        BackgroundCanceler.cancel(&exec, &j);
        assert_eq!(exec.commands(), vec!["scancel '4242'", "kill '4242'"]);
    }

    #[test]
    fn test_cancel_failure_is_swallowed() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        exec.inject(
            MockOp::Execute,
            FailureConfig::ssh(SshFailureKind::Connection),
        );
        let mut j = job();
        j.assign_remote_job_id("abc123abc123").unwrap();

        DockerCanceler.cancel(&exec, &j);
        InstanceCanceler.cancel(&exec, &j);
    }
}
