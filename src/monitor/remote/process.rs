//! Monitors for jobs running as plain processes or singularity instances
//!
//! Neither keeps a record once the work ends, so both fall back to the exit
//! code file written by the wrapper.

use serde::Deserialize;
use tracing::warn;

use jobflow_protocol::RemoteJobStatus;

use super::{exit_code_status, RemoteJobMonitor};
use crate::job::Job;
use crate::launch::shell_quote;
use crate::ports::{ExecError, RemoteExecutor};

#[derive(Debug, Deserialize)]
struct InstanceList {
    #[serde(default)]
    instances: Vec<InstanceEntry>,
}

#[derive(Debug, Deserialize)]
struct InstanceEntry {
    instance: String,
}

/// Whether `name` appears in `singularity instance list --json` output.
///
/// `None` when the output is not an instance list.
pub fn parse_instance_list(output: &str, name: &str) -> Option<bool> {
    let list: InstanceList = serde_json::from_str(output.trim()).ok()?;
    Some(list.instances.iter().any(|i| i.instance == name))
}

/// State letter of `pid` from `ps -o pid=,stat=` output
pub fn parse_ps_stat(output: &str, pid: &str) -> Option<char> {
    output.lines().find_map(|line| {
        let mut cols = line.split_whitespace();
        if cols.next()? != pid {
            return None;
        }
        cols.next()?.chars().next()
    })
}

/// `singularity instance start` jobs, tracked by instance name
#[derive(Debug, Clone, Copy)]
pub struct InstanceMonitor;

impl RemoteJobMonitor for InstanceMonitor {
    fn query_remote_job(
        &self,
        executor: &dyn RemoteExecutor,
        job: &Job,
        active: bool,
    ) -> Result<RemoteJobStatus, ExecError> {
        let Some(name) = job.remote_job_id() else {
            return Ok(RemoteJobStatus::Null);
        };
        let out = executor.execute(&format!(
            "singularity instance list --json {}",
            shell_quote(name)
        ))?;
        if !out.success() {
            return Ok(RemoteJobStatus::Null);
        }

        match parse_instance_list(&out.output, name) {
            Some(true) => Ok(RemoteJobStatus::Active),
            Some(false) => exit_code_status(executor, job, active),
            None => {
                warn!(job = %job.uuid, output = %out.output.trim(), "unparseable instance list");
                Ok(RemoteJobStatus::Done)
            }
        }
    }
}

/// Background processes (`singularity run`, unpacked zip apps), tracked by pid
#[derive(Debug, Clone, Copy)]
pub struct ProcessMonitor;

impl RemoteJobMonitor for ProcessMonitor {
    fn query_remote_job(
        &self,
        executor: &dyn RemoteExecutor,
        job: &Job,
        active: bool,
    ) -> Result<RemoteJobStatus, ExecError> {
        let Some(pid) = job.remote_job_id() else {
            return Ok(RemoteJobStatus::Null);
        };
        // ps exits 1 when the pid is gone; the output tells us either way
        let out = executor.execute(&format!("ps -o pid=,stat= -p {}", shell_quote(pid)))?;

        match parse_ps_stat(&out.output, pid) {
            Some('R' | 'S' | 'D' | 'I' | 'T' | 't' | 'W') => Ok(RemoteJobStatus::Active),
            Some('Z' | 'X') | None => exit_code_status(executor, job, active),
            Some(other) => {
                warn!(job = %job.uuid, state = %other, "unknown process state");
                Ok(RemoteJobStatus::Done)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedExecutor;
    use chrono::Utc;

    fn job(remote_id: &str) -> Job {
        let mut job = Job::new("dev", "alice", "sim", "1.0", "frontera", Utc::now());
        job.assign_remote_job_id(remote_id).unwrap();
        job
    }

    #[test]
    fn test_parse_ps_stat() {
        assert_eq!(parse_ps_stat("  4242 Ss\n", "4242"), Some('S'));
        assert_eq!(parse_ps_stat("4242 R+", "4242"), Some('R'));
        assert_eq!(parse_ps_stat("", "4242"), None);
        assert_eq!(parse_ps_stat("42 S", "4242"), None);
    }

    #[test]
    fn test_parse_instance_list() {
        let listed = r#"{"instances":[{"instance":"jobflow-1","pid":77,"img":"/x.sif"}]}"#;
        assert_eq!(parse_instance_list(listed, "jobflow-1"), Some(true));
        assert_eq!(parse_instance_list(r#"{"instances":[]}"#, "jobflow-1"), Some(false));
        assert_eq!(parse_instance_list("INSTANCE NAME", "jobflow-1"), None);
    }

    #[test]
    fn test_running_process() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        exec.on("ps -o", 0, "4242 S\n");
        assert_eq!(
            ProcessMonitor
                .query_remote_job(&exec, &job("4242"), false)
                .unwrap(),
            RemoteJobStatus::Active
        );
        assert_eq!(exec.commands(), vec!["ps -o pid=,stat= -p '4242'"]);
    }

    #[test]
    fn test_finished_process_reads_exit_code() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        exec.on("ps -o", 1, "");
        exec.on("jobflow.exitcode", 0, "0\n");
        assert_eq!(
            ProcessMonitor
                .query_remote_job(&exec, &job("4242"), true)
                .unwrap(),
            RemoteJobStatus::Done
        );

        let exec = ScriptedExecutor::new("login", 22, "alice");
        exec.on("ps -o", 0, "4242 Z\n");
        exec.on("jobflow.exitcode", 0, "2\n");
        assert_eq!(
            ProcessMonitor
                .query_remote_job(&exec, &job("4242"), true)
                .unwrap(),
            RemoteJobStatus::Failed
        );
    }

    #[test]
    fn test_instance_gone_without_exit_code() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        exec.on("instance list", 0, r#"{"instances":[]}"#);
        exec.on("jobflow.exitcode", 1, "No such file");
        let j = job("jobflow-1");

        assert_eq!(
            InstanceMonitor.query_remote_job(&exec, &j, false).unwrap(),
            RemoteJobStatus::Empty
        );
        assert_eq!(
            InstanceMonitor.query_remote_job(&exec, &j, true).unwrap(),
            RemoteJobStatus::Done
        );
    }
}
