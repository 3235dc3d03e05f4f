//! Job lifecycle driver
//!
//! A [`JobWorker`] takes one job through
//! PENDING → PROCESSING_INPUTS → STAGING_INPUTS → STAGING_JOB →
//! SUBMITTING_JOB → QUEUED → RUNNING → ARCHIVING → FINISHED, one stage at a
//! time, starting from whatever status the stored job is in. A stage either
//! advances the job, parks it in BLOCKED when the failure classifies as
//! recoverable, or ends it in FAILED or CANCELLED.

use std::sync::Arc;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use jobflow_protocol::{
    ConditionCode, JobStatus, RemoteJobStatus, RemoteOutcome, TransferElement, TransferRequest,
};
use jobflow_recovery::{RecoverableError, RecoveryMessage};

use crate::context::{Activity, JobExecutionContext, Services};
use crate::error::{classify, JobError};
use crate::job::Job;
use crate::launch::{canceler_for, launcher_for, remote_path, stager_for, Target};
use crate::monitor::{monitor_remote_job, monitor_transfer, TransferKind};
use crate::ports::{Queue, TransferClientError};

/// How an execution episode ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Finished,
    Failed(ConditionCode),
    Cancelled,
    /// Parked for recovery; the fingerprint names the recovery record
    Blocked { fingerprint: String },
    /// Paused or not runnable; status unchanged
    Released,
}

/// URI the transfer service understands for a path on a system
pub fn system_uri(system_id: &str, path: &str) -> String {
    format!("jobflow://{}/{}", system_id, path.trim_start_matches('/'))
}

/// Drives jobs through their lifecycle
#[derive(Debug, Clone)]
pub struct JobWorker {
    services: Arc<Services>,
}

impl JobWorker {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Load a job from the store and run it
    pub fn process(&self, uuid: Uuid) -> Result<WorkerOutcome, JobError> {
        let job = self.services.store.load(uuid)?;
        Ok(self.run_job(job))
    }

    /// Run every job currently on the job queue
    pub fn drain_queue(&self) -> Result<Vec<(Uuid, WorkerOutcome)>, JobError> {
        let messages = self.services.bus.drain(Queue::Job).map_err(|e| {
            JobError::collaborator(ConditionCode::JobInternalError, "unable to read job queue", e)
        })?;

        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            let uuid = match Uuid::parse_str(message.trim()) {
                Ok(uuid) => uuid,
                Err(e) => {
                    warn!(%message, error = %e, "dropping malformed job queue entry");
                    continue;
                }
            };
            match self.process(uuid) {
                Ok(outcome) => outcomes.push((uuid, outcome)),
                Err(e) => error!(job = %uuid, error = %e, "unable to process job"),
            }
        }
        Ok(outcomes)
    }

    /// Run one execution episode for `job`
    pub fn run_job(&self, job: Job) -> WorkerOutcome {
        let span = info_span!("job", uuid = %job.uuid, tenant = %job.tenant);
        let _guard = span.enter();

        if job.status == JobStatus::Blocked {
            warn!(blocked_from = ?job.blocked_from, "job is blocked, leaving it to recovery");
            return WorkerOutcome::Released;
        }
        if job.status.is_terminal() {
            return outcome_of(&job);
        }

        let mut ctx = JobExecutionContext::new(self.services.clone(), job);
        match execute(&mut ctx) {
            Ok(()) => outcome_of(ctx.job()),
            Err(e) => handle_error(&mut ctx, e),
        }
    }
}

fn outcome_of(job: &Job) -> WorkerOutcome {
    match job.status {
        JobStatus::Finished => WorkerOutcome::Finished,
        JobStatus::Cancelled => WorkerOutcome::Cancelled,
        JobStatus::Failed => {
            WorkerOutcome::Failed(job.condition.unwrap_or(ConditionCode::JobInternalError))
        }
        _ => WorkerOutcome::Released,
    }
}

/// Launch strategy for the job, failing fast on unsupported combinations
fn target(ctx: &mut JobExecutionContext) -> Result<Target, JobError> {
    let job_type = ctx.job_type()?;
    let app = ctx.app()?.clone();
    let scheduler = ctx.exec_system()?.scheduler;
    Target::for_app(job_type, &app, scheduler)
}

fn execute(ctx: &mut JobExecutionContext) -> Result<(), JobError> {
    loop {
        match ctx.job().status {
            JobStatus::Pending => {
                ctx.set_activity(Activity::CheckSystems);
                ctx.transition(JobStatus::ProcessingInputs)?;
            }
            JobStatus::ProcessingInputs => {
                ctx.set_activity(Activity::CheckSystems);
                check_systems(ctx)?;
                ctx.transition(JobStatus::StagingInputs)?;
            }
            JobStatus::StagingInputs => {
                ctx.set_activity(Activity::StageInputs);
                stage_inputs(ctx)?;
                ctx.transition(JobStatus::StagingJob)?;
            }
            JobStatus::StagingJob => {
                ctx.set_activity(Activity::StageJob);
                let target = target(ctx)?;
                stager_for(target).stage_job(ctx)?;
                ctx.transition(JobStatus::SubmittingJob)?;
            }
            JobStatus::SubmittingJob => {
                ctx.set_activity(Activity::SubmitJob);
                submit(ctx)?;
                ctx.transition(JobStatus::Queued)?;
            }
            JobStatus::Queued | JobStatus::Running => {
                ctx.set_activity(Activity::MonitorQueued);
                if !monitor(ctx)? {
                    return Ok(());
                }
                ctx.transition(JobStatus::Archiving)?;
            }
            JobStatus::Archiving => {
                ctx.set_activity(Activity::Archive);
                archive(ctx)?;
                return finish(ctx);
            }
            JobStatus::Blocked
            | JobStatus::Finished
            | JobStatus::Failed
            | JobStatus::Cancelled => return Ok(()),
        }
    }
}

/// Resolve everything the job needs before touching the remote system
fn check_systems(ctx: &mut JobExecutionContext) -> Result<(), JobError> {
    let target = target(ctx)?;
    ctx.archive_system()?;
    if let Some(queue) = ctx.logical_queue()? {
        ctx.validate_resources(&queue)?;
    }
    info!(%target, "systems checked");
    Ok(())
}

fn create_transfer(
    ctx: &JobExecutionContext,
    elements: Vec<TransferElement>,
    condition: ConditionCode,
) -> Result<String, JobError> {
    let job = ctx.job();
    let request = TransferRequest {
        tag: job.uuid.to_string(),
        elements,
    };
    ctx.services()
        .transfers
        .client(&job.tenant, &job.owner)
        .and_then(|client| client.create_transfer(&request))
        .map(|task| task.id)
        .map_err(|e: TransferClientError| {
            JobError::collaborator(condition, "unable to create transfer", e)
        })
}

fn stage_inputs(ctx: &mut JobExecutionContext) -> Result<(), JobError> {
    let job = ctx.job();
    let command = format!(
        "mkdir -p {} {} {}",
        remote_path(&job.exec_system_exec_dir),
        remote_path(&job.exec_system_input_dir),
        remote_path(&job.exec_system_output_dir)
    );
    let out = ctx.executor()?.execute(&command).map_err(|e| {
        JobError::collaborator(
            ConditionCode::JobUnableToStageInputs,
            "unable to create job directories",
            e,
        )
    })?;
    if !out.success() {
        return Err(JobError::RemoteExecution {
            condition: ConditionCode::JobUnableToStageInputs,
            exit_code: out.exit_code,
            message: "unable to create job directories".to_string(),
            output: out.output,
        });
    }

    if ctx.job().file_inputs.is_empty() {
        return Ok(());
    }

    let transfer_id = match ctx.job().input_transaction_id.clone() {
        Some(id) => {
            info!(transfer_id = %id, "resuming input transfer");
            id
        }
        None => {
            let job = ctx.job();
            // Inputs land through the data transfer node when one is configured
            let (system, root) = match (&job.dtn_system_id, &job.dtn_mount_point) {
                (Some(dtn), Some(mount)) => (
                    dtn.clone(),
                    format!("{}/{}", mount.trim_end_matches('/'), job.exec_system_input_dir),
                ),
                _ => (job.exec_system_id.clone(), job.exec_system_input_dir.clone()),
            };
            let elements = job
                .file_inputs
                .iter()
                .map(|input| TransferElement {
                    source_uri: input.source_url.clone(),
                    dest_uri: system_uri(&system, &format!("{}/{}", root, input.target_path)),
                })
                .collect();

            let id = create_transfer(ctx, elements, ConditionCode::JobUnableToStageInputs)?;
            ctx.job_mut().input_transaction_id = Some(id.clone());
            ctx.save()?;
            info!(transfer_id = %id, "input transfer created");
            id
        }
    };

    let tag = ctx.job().uuid.to_string();
    monitor_transfer(ctx, &transfer_id, &tag, TransferKind::Inputs, true)
}

fn submit(ctx: &mut JobExecutionContext) -> Result<(), JobError> {
    if let Some(remote_id) = ctx.job().remote_job_id() {
        info!(remote_job_id = %remote_id, "job already submitted, not launching again");
        return Ok(());
    }

    let target = target(ctx)?;
    if let Some(queue) = ctx.logical_queue()? {
        ctx.validate_resources(&queue)?;
        ctx.check_quota(&queue)?;
    }
    launcher_for(target).launch(ctx)?;
    Ok(())
}

/// Watch the remote job and record its outcome.
///
/// Returns whether the job goes on to archiving.
fn monitor(ctx: &mut JobExecutionContext) -> Result<bool, JobError> {
    let target = target(ctx)?;
    let status = monitor_remote_job(ctx, target)?;

    let outcome = match status {
        RemoteJobStatus::Failed if ctx.job().archive_on_app_error => RemoteOutcome::Failed,
        RemoteJobStatus::Failed => RemoteOutcome::FailedSkipArchive,
        _ => RemoteOutcome::Finished,
    };
    ctx.job_mut().remote_outcome = Some(outcome);
    ctx.save()?;

    if outcome == RemoteOutcome::FailedSkipArchive {
        ctx.set_condition(
            ConditionCode::JobRemoteOutcomeError,
            "application failed on the execution system; outputs not archived",
        )?;
        ctx.transition(JobStatus::Failed)?;
        return Ok(false);
    }
    Ok(true)
}

fn archive(ctx: &mut JobExecutionContext) -> Result<(), JobError> {
    let Some(archive_dir) = ctx.job().archive_system_dir.clone() else {
        return Ok(());
    };

    let transfer_id = match ctx.job().archive_transaction_id.clone() {
        Some(id) => {
            info!(transfer_id = %id, "resuming archive transfer");
            id
        }
        None => {
            let archive_system = ctx.archive_system()?.id.clone();
            let job = ctx.job();
            let elements = vec![TransferElement {
                source_uri: system_uri(&job.exec_system_id, &job.exec_system_output_dir),
                dest_uri: system_uri(&archive_system, &archive_dir),
            }];

            let id = create_transfer(ctx, elements, ConditionCode::JobArchivingFailed)?;
            ctx.job_mut().archive_transaction_id = Some(id.clone());
            ctx.save()?;
            info!(transfer_id = %id, "archive transfer created");
            id
        }
    };

    let tag = ctx.job().uuid.to_string();
    monitor_transfer(ctx, &transfer_id, &tag, TransferKind::Archive, true)
}

fn finish(ctx: &mut JobExecutionContext) -> Result<(), JobError> {
    if ctx.job().remote_outcome == Some(RemoteOutcome::Failed) {
        ctx.set_condition(
            ConditionCode::JobRemoteOutcomeError,
            "application failed on the execution system",
        )?;
        return ctx.transition(JobStatus::Failed);
    }
    ctx.set_condition(ConditionCode::NormalCompletion, "job completed")?;
    ctx.transition(JobStatus::Finished)
}

fn handle_error(ctx: &mut JobExecutionContext, error: JobError) -> WorkerOutcome {
    match error {
        JobError::Cancelled => cancel(ctx),
        JobError::Paused => {
            info!(status = %ctx.job().status, "job paused, releasing");
            if let Err(e) = ctx.save() {
                warn!(error = %e, "unable to save paused job");
            }
            WorkerOutcome::Released
        }
        other => match classify(other, &ctx.failure_context()) {
            Ok(mut recoverable) => {
                recoverable.update_job_activity(ctx.activity().as_str());
                park(ctx, recoverable)
            }
            Err(permanent) => fail(ctx, permanent.condition(), &permanent.last_message()),
        },
    }
}

fn cancel(ctx: &mut JobExecutionContext) -> WorkerOutcome {
    if ctx.job().remote_job_id().is_some() {
        match (target(ctx), ctx.executor()) {
            (Ok(target), Ok(executor)) => {
                canceler_for(target).cancel(executor.as_ref(), ctx.job());
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "unable to reach remote job for cancellation");
            }
        }
    }

    let result = ctx
        .set_condition(ConditionCode::CancelledByUser, "job cancelled by user")
        .and_then(|()| ctx.transition(JobStatus::Cancelled));
    if let Err(e) = result {
        error!(error = %e, "unable to record cancellation");
    }
    WorkerOutcome::Cancelled
}

fn fail(ctx: &mut JobExecutionContext, condition: ConditionCode, message: &str) -> WorkerOutcome {
    warn!(%condition, %message, "job failed");
    let result = ctx
        .set_condition(condition, message)
        .and_then(|()| ctx.transition(JobStatus::Failed));
    if let Err(e) = result {
        error!(error = %e, "unable to record job failure");
    }
    WorkerOutcome::Failed(condition)
}

/// Move the job to BLOCKED and hand it to recovery
fn park(ctx: &mut JobExecutionContext, recoverable: RecoverableError) -> WorkerOutcome {
    let blocked_from = ctx.job().status;
    let now = ctx.clock().utc_now();
    let message = match RecoveryMessage::from_error(
        ctx.job().uuid,
        ctx.job().tenant.clone(),
        blocked_from,
        &recoverable,
        now,
    ) {
        Ok(message) => message,
        Err(e) => {
            return fail(
                ctx,
                ConditionCode::JobInternalError,
                &format!("unable to park job after {}: {}", recoverable, e),
            )
        }
    };
    let payload = match message.to_json() {
        Ok(payload) => payload,
        Err(e) => {
            return fail(
                ctx,
                ConditionCode::JobInternalError,
                &format!("unable to encode recovery message: {}", e),
            )
        }
    };

    if let Err(e) = ctx.transition(JobStatus::Blocked) {
        return fail(ctx, e.condition(), &e.last_message());
    }
    if let Err(e) = ctx.services().bus.publish(Queue::Recovery, &payload) {
        return fail(
            ctx,
            ConditionCode::JobInternalError,
            &format!("unable to queue recovery for {}: {}", recoverable, e),
        );
    }

    info!(
        category = %recoverable.category,
        activity = ?recoverable.job_activity(),
        %blocked_from,
        fingerprint = %message.fingerprint,
        "job blocked for recovery"
    );
    WorkerOutcome::Blocked {
        fingerprint: message.fingerprint,
    }
}
