//! Launchers
//!
//! A launcher runs the staged wrapper, reads the remote identifier from the
//! command output and persists it on the job before returning. A non-zero
//! exit is a hard failure carrying the remote output.

use rand::Rng;
use regex_lite::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

use jobflow_protocol::ConditionCode;

use super::script::remote_path;
use super::{instance_name, OUTPUT_FILE, WRAPPER_FILE};
use crate::context::JobExecutionContext;
use crate::error::JobError;
use crate::job::Job;

pub trait Launcher: Send + Sync {
    /// Remote command that submits the job
    fn launch_command(&self, job: &Job) -> String;

    /// Remote identifier from the launch output
    fn parse_remote_id(&self, job: &Job, output: &str) -> Option<String>;

    /// Submit the job and record its remote id
    fn launch(&self, ctx: &mut JobExecutionContext) -> Result<String, JobError> {
        throttle(ctx);

        let executor = ctx.executor()?;
        let command = self.launch_command(ctx.job());
        debug!(job = %ctx.job().uuid, %command, "launching");

        let out = executor.execute(&command).map_err(|e| {
            JobError::collaborator(ConditionCode::JobLaunchFailure, "unable to launch job", e)
        })?;
        if !out.success() {
            return Err(JobError::RemoteExecution {
                condition: ConditionCode::JobLaunchFailure,
                exit_code: out.exit_code,
                message: "launch command failed".to_string(),
                output: out.output,
            });
        }

        let remote_id = self
            .parse_remote_id(ctx.job(), &out.output)
            .ok_or_else(|| JobError::RemoteExecution {
                condition: ConditionCode::JobLaunchFailure,
                exit_code: out.exit_code,
                message: "no remote job id in launch output".to_string(),
                output: out.output.clone(),
            })?;

        ctx.set_remote_job_id(&remote_id)?;
        info!(job = %ctx.job().uuid, remote_job_id = %remote_id, "job launched");
        Ok(remote_id)
    }
}

/// Random pause before launching so many jobs don't hit one host at once
fn throttle(ctx: &JobExecutionContext) {
    let max_ms = ctx.config().worker.launch_throttle_max_ms;
    if max_ms == 0 {
        return;
    }
    let delay = Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms));
    debug!(job = %ctx.job().uuid, delay_ms = delay.as_millis() as u64, "launch throttle");
    ctx.clock().sleep(delay);
}

fn run_wrapper(job: &Job) -> String {
    format!(
        "cd {} && ./{}",
        remote_path(&job.exec_system_exec_dir),
        WRAPPER_FILE
    )
}

fn last_line(output: &str) -> Option<&str> {
    output.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

/// Container id printed by `docker run -d`
pub fn parse_container_id(output: &str) -> Option<String> {
    static ID: OnceLock<Option<Regex>> = OnceLock::new();
    let re = ID
        .get_or_init(|| Regex::new(r"^[0-9a-f]{12,64}$").ok())
        .as_ref()?;
    last_line(output)
        .filter(|line| re.is_match(line))
        .map(str::to_string)
}

/// Process id echoed by `echo $!`
pub fn parse_pid(output: &str) -> Option<String> {
    last_line(output)
        .filter(|line| line.parse::<u32>().map_or(false, |pid| pid > 0))
        .map(str::to_string)
}

/// Job id from "Submitted batch job N"
pub fn parse_sbatch_job_id(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once("Submitted batch job ")?;
        let id = rest.split_whitespace().next()?;
        // Federated clusters append ";cluster"
        let id = id.split(';').next()?;
        id.parse::<u64>().ok().map(|n| n.to_string())
    })
}

#[derive(Debug, Clone, Copy)]
pub struct DockerLauncher;

impl Launcher for DockerLauncher {
    fn launch_command(&self, job: &Job) -> String {
        run_wrapper(job)
    }

    fn parse_remote_id(&self, _job: &Job, output: &str) -> Option<String> {
        parse_container_id(output)
    }
}

/// Instances are tracked by their deterministic name
#[derive(Debug, Clone, Copy)]
pub struct InstanceLauncher;

impl Launcher for InstanceLauncher {
    fn launch_command(&self, job: &Job) -> String {
        run_wrapper(job)
    }

    fn parse_remote_id(&self, job: &Job, _output: &str) -> Option<String> {
        Some(instance_name(&job.uuid))
    }
}

/// Runs the wrapper detached and reports its pid
#[derive(Debug, Clone, Copy)]
pub struct BackgroundLauncher;

impl Launcher for BackgroundLauncher {
    fn launch_command(&self, job: &Job) -> String {
        format!(
            "cd {} && nohup ./{} > {} 2>&1 < /dev/null & echo $!",
            remote_path(&job.exec_system_exec_dir),
            WRAPPER_FILE,
            OUTPUT_FILE
        )
    }

    fn parse_remote_id(&self, _job: &Job, output: &str) -> Option<String> {
        parse_pid(output)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SlurmLauncher;

impl Launcher for SlurmLauncher {
    fn launch_command(&self, job: &Job) -> String {
        format!(
            "cd {} && sbatch {}",
            remote_path(&job.exec_system_exec_dir),
            WRAPPER_FILE
        )
    }

    fn parse_remote_id(&self, _job: &Job, output: &str) -> Option<String> {
        parse_sbatch_job_id(output)
    }
}
