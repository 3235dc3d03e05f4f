//! Remote job monitor family
//!
//! One monitor per launch [`Target`]. Each maps the target's native states
//! onto [`RemoteJobStatus`]; anything unrecognised is reported as DONE with
//! a warning so a job never hangs on an answer nobody understands.

mod docker;
mod process;
mod slurm;

pub use docker::{parse_docker_state, DockerMonitor};
pub use process::{parse_instance_list, parse_ps_stat, InstanceMonitor, ProcessMonitor};
pub use slurm::{normalize_slurm_state, slurm_status, SlurmMonitor};

use tracing::{debug, info, warn};

use jobflow_protocol::{ConditionCode, JobStatus, RemoteJobStatus};
use jobflow_recovery::Exhausted;

use super::{check_command, invalid_policy};
use crate::context::JobExecutionContext;
use crate::error::JobError;
use crate::job::Job;
use crate::launch::{exec_file, remote_path, Target, EXIT_CODE_FILE};
use crate::ports::{ExecError, RemoteExecutor};

pub trait RemoteJobMonitor: Send + Sync {
    /// Ask the remote system for the job's state.
    ///
    /// `active` tells the monitor the job has already been seen running.
    fn query_remote_job(
        &self,
        executor: &dyn RemoteExecutor,
        job: &Job,
        active: bool,
    ) -> Result<RemoteJobStatus, ExecError>;

    /// Remove remote leftovers after a terminal state; never fails
    fn clean_up_remote_job(&self, _executor: &dyn RemoteExecutor, _job: &Job) {}
}

pub fn monitor_for(target: Target) -> Box<dyn RemoteJobMonitor> {
    match target {
        Target::Docker => Box::new(DockerMonitor),
        Target::SingularityInstance => Box::new(InstanceMonitor),
        Target::SingularityRun | Target::Zip => Box::new(ProcessMonitor),
        Target::Slurm(_) => Box::new(SlurmMonitor),
    }
}

/// Status from the exit code file the wrapper leaves behind
pub(crate) fn exit_code_status(
    executor: &dyn RemoteExecutor,
    job: &Job,
    active: bool,
) -> Result<RemoteJobStatus, ExecError> {
    let path = remote_path(&exec_file(job, EXIT_CODE_FILE));
    let out = executor.execute(&format!("cat {}", path))?;
    if !out.success() {
        // The process is gone without writing a status
        return Ok(if active {
            RemoteJobStatus::Done
        } else {
            RemoteJobStatus::Empty
        });
    }

    match out.output.trim().parse::<i32>() {
        Ok(0) => Ok(RemoteJobStatus::Done),
        Ok(code) => {
            debug!(job = %job.uuid, exit_code = code, "application exited non-zero");
            Ok(RemoteJobStatus::Failed)
        }
        Err(_) => {
            warn!(job = %job.uuid, content = %out.output.trim(), "unreadable exit code file");
            Ok(RemoteJobStatus::Done)
        }
    }
}

fn check_failed(ctx: &mut JobExecutionContext, code: ConditionCode, message: String) -> JobError {
    if let Err(e) = ctx.set_condition(code, &message) {
        return e;
    }
    JobError::failed(code, message)
}

/// Poll the remote job until it reaches DONE or FAILED.
///
/// The first ACTIVE answer moves a QUEUED job to RUNNING. EMPTY, NULL and
/// query errors count against the failure series.
pub fn monitor_remote_job(
    ctx: &mut JobExecutionContext,
    target: Target,
) -> Result<RemoteJobStatus, JobError> {
    let Some(remote_id) = ctx.job().remote_job_id().map(str::to_string) else {
        return Err(JobError::failed(
            ConditionCode::JobExecutionMonitoringError,
            "job has no remote job id to monitor",
        ));
    };
    let policy = ctx
        .config()
        .remote_policy()
        .map_err(|e| invalid_policy("remote", e))?;
    let mut backoff = policy.start();
    let monitor = monitor_for(target);
    let mut last_error: Option<JobError> = None;
    let mut seen_active = ctx.job().status == JobStatus::Running;

    info!(job = %ctx.job().uuid, remote_job_id = %remote_id, %target, "monitoring remote job");

    loop {
        check_command(ctx)?;

        let answer = ctx.executor().and_then(|executor| {
            monitor
                .query_remote_job(executor.as_ref(), ctx.job(), seen_active)
                .map_err(|e| {
                    JobError::collaborator(
                        ConditionCode::JobExecutionMonitoringError,
                        format!("unable to query remote job {}", remote_id),
                        e,
                    )
                })
        });

        let now = ctx.clock().utc_now();
        ctx.job_mut().remote_last_status_check = Some(now);

        match answer {
            Ok(status) if !status.is_inconclusive() => {
                backoff.record_success();
                last_error = None;
                ctx.job_mut().remote_checks_success += 1;
                debug!(job = %ctx.job().uuid, %status, "remote status");

                match status {
                    RemoteJobStatus::Active => {
                        seen_active = true;
                        if ctx.job().status == JobStatus::Queued {
                            ctx.job_mut().remote_started = Some(now);
                            ctx.transition(JobStatus::Running)?;
                        }
                    }
                    RemoteJobStatus::Done | RemoteJobStatus::Failed => {
                        // Jobs that finish between checks are never seen active
                        let job = ctx.job_mut();
                        job.remote_started.get_or_insert(now);
                        job.remote_ended = Some(now);
                        if let Ok(executor) = ctx.executor() {
                            monitor.clean_up_remote_job(executor.as_ref(), ctx.job());
                        }
                        ctx.save()?;
                        info!(job = %ctx.job().uuid, %status, "remote job ended");
                        return Ok(status);
                    }
                    _ => {}
                }
            }
            Ok(status) => {
                debug!(job = %ctx.job().uuid, %status, "inconclusive remote status");
                backoff.record_failure_at(ctx.clock().now());
                last_error = None;
                ctx.job_mut().remote_checks_failed += 1;
            }
            Err(e) => {
                warn!(job = %ctx.job().uuid, error = %e, "remote status check failed");
                backoff.record_failure_at(ctx.clock().now());
                ctx.job_mut().remote_checks_failed += 1;
                ctx.reset_executor();
                last_error = Some(e);
            }
        }

        match backoff.next_delay_at(ctx.clock().now()) {
            Ok(delay) => ctx.clock().sleep(delay),
            Err(reason) => {
                ctx.save()?;
                return Err(match (reason, last_error) {
                    (Exhausted::TooManyFailures, Some(e)) => e,
                    (Exhausted::TooManyFailures, None) => check_failed(
                        ctx,
                        ConditionCode::JobExecutionMonitoringError,
                        format!("no usable status for remote job {}", remote_id),
                    ),
                    (Exhausted::TooManyAttempts, _) => check_failed(
                        ctx,
                        ConditionCode::JobExecutionMonitoringTimeout,
                        format!("gave up monitoring remote job {}", remote_id),
                    ),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::context::Services;
    use crate::job::CommandRegistry;
    use crate::mock::{
        FailureConfig, InMemoryBus, InMemoryJobStore, ManualClock, MockExecutorFactory,
        MockTransferService, RecordingEventSink, ScriptedExecutor, StaticResolver,
    };
    use crate::resource::ExecSystem;
    use chrono::Utc;
    use jobflow_protocol::{AsyncCommand, RuntimeKind, SchedulerType};
    use jobflow_recovery::{classify_chain, BackoffStep, RecoveryCategory, SshFailureKind};
    use std::sync::Arc;

    struct Harness {
        services: Arc<Services>,
        executor: Arc<ScriptedExecutor>,
        store: Arc<InMemoryJobStore>,
    }

    fn harness(config: OrchestratorConfig) -> Harness {
        let executor = Arc::new(ScriptedExecutor::new("login", 22, "alice"));
        let resolver = Arc::new(StaticResolver::new());
        resolver.add_system(ExecSystem {
            id: "frontera".to_string(),
            tenant: "dev".to_string(),
            owner: "admin".to_string(),
            enabled: true,
            host: "login".to_string(),
            port: 22,
            effective_user: "alice".to_string(),
            scheduler: Some(SchedulerType::Slurm),
            batch_logical_queues: vec![],
            batch_default_logical_queue: None,
            scheduler_options: vec![],
        });
        let store = Arc::new(InMemoryJobStore::new());
        let services = Arc::new(Services {
            store: store.clone(),
            executors: Arc::new(MockExecutorFactory::new(executor.clone())),
            transfers: Arc::new(MockTransferService::new()),
            events: Arc::new(RecordingEventSink::new()),
            bus: Arc::new(InMemoryBus::new()),
            resolver,
            clock: Arc::new(ManualClock::new()),
            commands: Arc::new(CommandRegistry::new()),
            config,
        });
        Harness {
            services,
            executor,
            store,
        }
    }

    fn queued_context(h: &Harness) -> JobExecutionContext {
        let mut job = Job::new("dev", "alice", "sim", "1.0", "frontera", Utc::now());
        job.status = JobStatus::Queued;
        job.remote_job_id = Some("1234".to_string());
        h.store.insert(job.clone());
        JobExecutionContext::new(h.services.clone(), job)
    }

    fn slurm() -> Target {
        Target::Slurm(RuntimeKind::Singularity)
    }

    #[test]
    fn test_queued_running_done() {
        let h = harness(OrchestratorConfig::default());
        h.executor.on("squeue", 0, "PENDING\n");
        h.executor.on("squeue", 0, "RUNNING\n");
        h.executor.on("squeue", 0, "");
        h.executor.on("sacct", 0, "COMPLETED\nCOMPLETED\n");
        let mut ctx = queued_context(&h);
        let uuid = ctx.job().uuid;

        let status = monitor_remote_job(&mut ctx, slurm()).unwrap();
        assert_eq!(status, RemoteJobStatus::Done);

        let job = ctx.job();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.remote_checks_success, 3);
        assert_eq!(job.remote_checks_failed, 0);
        assert!(job.remote_started.is_some());
        assert!(job.remote_ended.is_some());
        assert_eq!(
            h.store.status_history(uuid),
            vec![JobStatus::Queued, JobStatus::Running]
        );
    }

    #[test]
    fn test_done_before_seen_active_sets_both_times() {
        let h = harness(OrchestratorConfig::default());
        h.executor.on("squeue", 0, "");
        h.executor.on("sacct", 0, "COMPLETED\n");
        let mut ctx = queued_context(&h);

        let status = monitor_remote_job(&mut ctx, slurm()).unwrap();
        assert_eq!(status, RemoteJobStatus::Done);

        let job = ctx.job();
        assert_eq!(job.remote_checks_success, 1);
        assert!(job.remote_ended.is_some());
        assert_eq!(job.remote_started, job.remote_ended);
    }

    #[test]
    fn test_missing_remote_id() {
        let h = harness(OrchestratorConfig::default());
        let mut ctx = queued_context(&h);
        ctx.job_mut().remote_job_id = None;

        let err = monitor_remote_job(&mut ctx, slurm()).unwrap_err();
        assert_eq!(err.condition(), ConditionCode::JobExecutionMonitoringError);
        assert!(h.executor.commands().is_empty());
    }

    #[test]
    fn test_attempts_exhausted() {
        let mut config = OrchestratorConfig::default();
        config.monitor.remote.steps = vec![BackoffStep::seconds(2, 10)];
        let h = harness(config);
        h.executor.on("squeue", 0, "PENDING\n");
        let mut ctx = queued_context(&h);

        let err = monitor_remote_job(&mut ctx, slurm()).unwrap_err();
        assert_eq!(err.condition(), ConditionCode::JobExecutionMonitoringTimeout);
        assert_eq!(h.executor.count("squeue"), 3);
        assert_eq!(
            ctx.job().condition,
            Some(ConditionCode::JobExecutionMonitoringTimeout)
        );
    }

    #[test]
    fn test_empty_answers_exhaust_failure_series() {
        let mut config = OrchestratorConfig::default();
        config.monitor.remote.steps = vec![BackoffStep::minutes(0, 1)];
        config.monitor.remote.max_failure_seconds = 120;
        let h = harness(config);
        h.executor.on("squeue", 0, "");
        h.executor.on("sacct", 0, "");
        let mut ctx = queued_context(&h);

        let err = monitor_remote_job(&mut ctx, slurm()).unwrap_err();
        assert_eq!(err.condition(), ConditionCode::JobExecutionMonitoringError);
        assert!(classify_chain(&err, &ctx.failure_context()).is_none());
        assert_eq!(ctx.job().remote_checks_failed, 4);
    }

    #[test]
    fn test_ssh_failures_surface_as_recoverable() {
        let mut config = OrchestratorConfig::default();
        config.monitor.remote.steps = vec![BackoffStep::minutes(0, 1)];
        config.monitor.remote.max_failure_seconds = 120;
        let h = harness(config);
        h.executor
            .fail_on("squeue", FailureConfig::ssh(SshFailureKind::Timeout));
        let mut ctx = queued_context(&h);

        let err = monitor_remote_job(&mut ctx, slurm()).unwrap_err();
        let r = classify_chain(&err, &ctx.failure_context()).unwrap();
        assert_eq!(r.category, RecoveryCategory::SshTimeout);
    }

    #[test]
    fn test_cancel_checked_before_query() {
        let h = harness(OrchestratorConfig::default());
        let mut ctx = queued_context(&h);
        h.services
            .commands
            .deliver(ctx.job().uuid, AsyncCommand::Cancel);

        let err = monitor_remote_job(&mut ctx, slurm()).unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
        assert!(h.executor.commands().is_empty());
    }

    #[test]
    fn test_exit_code_file() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        let job = Job::new("dev", "alice", "sim", "1.0", "frontera", Utc::now());

        exec.on("jobflow.exitcode", 1, "cat: No such file or directory");
        assert_eq!(
            exit_code_status(&exec, &job, true).unwrap(),
            RemoteJobStatus::Done
        );
        assert_eq!(
            exit_code_status(&exec, &job, false).unwrap(),
            RemoteJobStatus::Empty
        );

        let exec = ScriptedExecutor::new("login", 22, "alice");
        exec.on("jobflow.exitcode", 0, "3\n");
        assert_eq!(
            exit_code_status(&exec, &job, true).unwrap(),
            RemoteJobStatus::Failed
        );
        assert!(exec.commands()[0].starts_with("cat \"$HOME\"/'jobs/"));
    }
}
