//! Slurm batch job monitor
//!
//! `squeue` answers while the job is known to the controller; afterwards the
//! state comes from accounting (`sacct`). A job can have several accounting
//! rows (the allocation plus its steps): any active row keeps the job
//! active, otherwise any non-COMPLETED row fails it.

use tracing::warn;

use jobflow_protocol::RemoteJobStatus;

use super::RemoteJobMonitor;
use crate::job::Job;
use crate::launch::shell_quote;
use crate::ports::{ExecError, RemoteExecutor};

/// Base state name: drops `+` flags, `:` suffixes, `(reason)` and trailing words
pub fn normalize_slurm_state(state: &str) -> String {
    state
        .split(|c: char| c == '+' || c == ':' || c == '(' || c.is_whitespace())
        .find(|token| !token.is_empty())
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn is_pending(state: &str) -> bool {
    matches!(state, "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "RESV_DEL_HOLD")
}

fn is_active(state: &str) -> bool {
    matches!(
        state,
        "RUNNING"
            | "COMPLETING"
            | "SUSPENDED"
            | "RESIZING"
            | "STAGE_OUT"
            | "STAGE_IN"
            | "SIGNALING"
            | "STOPPED"
    )
}

fn is_failure(state: &str) -> bool {
    matches!(
        state,
        "CANCELLED"
            | "FAILED"
            | "TIMEOUT"
            | "NODE_FAIL"
            | "PREEMPTED"
            | "BOOT_FAIL"
            | "OUT_OF_MEMORY"
            | "DEADLINE"
            | "SPECIAL_EXIT"
            | "REVOKED"
    )
}

/// Combine the state column of `squeue`/`sacct` output into one status
pub fn slurm_status(output: &str) -> RemoteJobStatus {
    let states: Vec<String> = output
        .lines()
        .map(|line| line.split('|').next().unwrap_or(line).trim())
        .filter(|state| !state.is_empty())
        .map(normalize_slurm_state)
        .collect();

    if states.is_empty() {
        return RemoteJobStatus::Empty;
    }
    if states.iter().any(|s| is_active(s)) {
        return RemoteJobStatus::Active;
    }
    if states.iter().any(|s| is_pending(s)) {
        return RemoteJobStatus::Queued;
    }
    if states.iter().any(|s| is_failure(s)) {
        return RemoteJobStatus::Failed;
    }
    if let Some(unknown) = states.iter().find(|s| s.as_str() != "COMPLETED") {
        warn!(state = %unknown, "unknown slurm state");
    }
    RemoteJobStatus::Done
}

#[derive(Debug, Clone, Copy)]
pub struct SlurmMonitor;

impl RemoteJobMonitor for SlurmMonitor {
    fn query_remote_job(
        &self,
        executor: &dyn RemoteExecutor,
        job: &Job,
        _active: bool,
    ) -> Result<RemoteJobStatus, ExecError> {
        let Some(id) = job.remote_job_id() else {
            return Ok(RemoteJobStatus::Null);
        };
        let id = shell_quote(id);

        // squeue exits non-zero once the controller forgot the job
        let out = executor.execute(&format!("squeue -h -j {} -o %T", id))?;
        if out.success() && !out.output.trim().is_empty() {
            return Ok(slurm_status(&out.output));
        }

        let out = executor.execute(&format!("sacct -n -P -j {} --format=State", id))?;
        if !out.success() {
            return Ok(RemoteJobStatus::Null);
        }
        Ok(slurm_status(&out.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedExecutor;
    use chrono::Utc;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_slurm_state("CANCELLED by 1234"), "CANCELLED");
        assert_eq!(normalize_slurm_state("RUNNING+"), "RUNNING");
        assert_eq!(normalize_slurm_state("failed:1"), "FAILED");
        assert_eq!(normalize_slurm_state("PENDING(Resources)"), "PENDING");
    }

    #[test]
    fn test_slurm_status() {
        assert_eq!(slurm_status("PENDING\n"), RemoteJobStatus::Queued);
        assert_eq!(slurm_status("RUNNING|\nCOMPLETED|\n"), RemoteJobStatus::Active);
        assert_eq!(slurm_status("COMPLETED\nCOMPLETED\n"), RemoteJobStatus::Done);
        assert_eq!(slurm_status("COMPLETED\nOUT_OF_MEMORY\n"), RemoteJobStatus::Failed);
        assert_eq!(slurm_status("CANCELLED by 501\n"), RemoteJobStatus::Failed);
        assert_eq!(slurm_status("\n  \n"), RemoteJobStatus::Empty);
        assert_eq!(slurm_status("LAUNCH_FAILED_SOMEHOW"), RemoteJobStatus::Done);
    }

    #[test]
    fn test_falls_back_to_sacct() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        exec.on("squeue", 1, "slurm_load_jobs error: Invalid job id specified");
        exec.on("sacct", 0, "TIMEOUT\nCANCELLED\n");
        let mut job = Job::new("dev", "alice", "sim", "1.0", "frontera", Utc::now());
        job.assign_remote_job_id("11").unwrap();

        assert_eq!(
            SlurmMonitor.query_remote_job(&exec, &job, true).unwrap(),
            RemoteJobStatus::Failed
        );
        assert_eq!(
            exec.commands(),
            vec![
                "squeue -h -j '11' -o %T",
                "sacct -n -P -j '11' --format=State"
            ]
        );
    }
}
