//! Docker container monitor

use serde::Deserialize;
use tracing::{debug, warn};

use jobflow_protocol::RemoteJobStatus;

use super::RemoteJobMonitor;
use crate::job::Job;
use crate::launch::shell_quote;
use crate::ports::{ExecError, RemoteExecutor};

/// The parts of `docker inspect`'s `.State` we read
#[derive(Debug, Deserialize)]
struct ContainerState {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "ExitCode", default)]
    exit_code: i32,
}

/// Map `{{json .State}}` output to a canonical status
pub fn parse_docker_state(output: &str) -> RemoteJobStatus {
    let state: ContainerState = match serde_json::from_str(output.trim()) {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, output = %output.trim(), "unparseable docker state");
            return RemoteJobStatus::Done;
        }
    };

    match state.status.as_str() {
        "created" => RemoteJobStatus::Queued,
        "running" | "restarting" | "paused" => RemoteJobStatus::Active,
        "exited" if state.exit_code == 0 => RemoteJobStatus::Done,
        "exited" | "dead" => RemoteJobStatus::Failed,
        other => {
            warn!(state = other, "unknown docker container state");
            RemoteJobStatus::Done
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DockerMonitor;

impl RemoteJobMonitor for DockerMonitor {
    fn query_remote_job(
        &self,
        executor: &dyn RemoteExecutor,
        job: &Job,
        _active: bool,
    ) -> Result<RemoteJobStatus, ExecError> {
        let Some(id) = job.remote_job_id() else {
            return Ok(RemoteJobStatus::Null);
        };
        let out = executor.execute(&format!(
            "docker inspect --format '{{{{json .State}}}}' {}",
            shell_quote(id)
        ))?;

        if !out.success() {
            if out.output.contains("No such") {
                return Ok(RemoteJobStatus::Empty);
            }
            debug!(job = %job.uuid, exit_code = out.exit_code, "docker inspect failed");
            return Ok(RemoteJobStatus::Null);
        }
        Ok(parse_docker_state(&out.output))
    }

    fn clean_up_remote_job(&self, executor: &dyn RemoteExecutor, job: &Job) {
        let Some(id) = job.remote_job_id() else {
            return;
        };
        match executor.execute(&format!("docker rm {}", shell_quote(id))) {
            Ok(out) if out.success() => debug!(job = %job.uuid, container = id, "container removed"),
            Ok(out) => warn!(job = %job.uuid, output = %out.output.trim(), "docker rm failed"),
            Err(e) => warn!(job = %job.uuid, error = %e, "unable to remove container"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedExecutor;
    use chrono::Utc;

    #[test]
    fn test_parse_docker_state() {
        assert_eq!(
            parse_docker_state(r#"{"Status":"running","Running":true,"ExitCode":0}"#),
            RemoteJobStatus::Active
        );
        assert_eq!(
            parse_docker_state(r#"{"Status":"exited","ExitCode":0}"#),
            RemoteJobStatus::Done
        );
        assert_eq!(
            parse_docker_state(r#"{"Status":"exited","ExitCode":137}"#),
            RemoteJobStatus::Failed
        );
        assert_eq!(
            parse_docker_state(r#"{"Status":"created"}"#),
            RemoteJobStatus::Queued
        );
        assert_eq!(
            parse_docker_state(r#"{"Status":"removing"}"#),
            RemoteJobStatus::Done
        );
        assert_eq!(parse_docker_state("not json"), RemoteJobStatus::Done);
    }

    #[test]
    fn test_query_and_cleanup() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        let mut job = Job::new("dev", "alice", "sim", "1.0", "frontera", Utc::now());
        job.assign_remote_job_id("4f2a9c1e8b7d").unwrap();

        exec.on("docker inspect", 0, r#"{"Status":"exited","ExitCode":0}"#);
        assert_eq!(
            DockerMonitor.query_remote_job(&exec, &job, true).unwrap(),
            RemoteJobStatus::Done
        );
        assert_eq!(
            exec.commands()[0],
            "docker inspect --format '{{json .State}}' '4f2a9c1e8b7d'"
        );

        DockerMonitor.clean_up_remote_job(&exec, &job);
        assert_eq!(exec.count("docker rm '4f2a9c1e8b7d'"), 1);
    }

    #[test]
    fn test_missing_container_is_empty() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        let mut job = Job::new("dev", "alice", "sim", "1.0", "frontera", Utc::now());
        job.assign_remote_job_id("4f2a9c1e8b7d").unwrap();

        exec.on(
            "docker inspect",
            1,
            "Error: No such object: 4f2a9c1e8b7d",
        );
        assert_eq!(
            DockerMonitor.query_remote_job(&exec, &job, false).unwrap(),
            RemoteJobStatus::Empty
        );
    }
}
