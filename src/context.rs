//! Job execution context
//!
//! One [`JobExecutionContext`] exists per worker execution episode. It owns
//! the working copy of the job, the resolved system and app metadata, the
//! executor connection (opened on first use) and the job's async command
//! slot, and it unregisters that slot when dropped.

use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use jobflow_protocol::{AsyncCommand, ConditionCode, JobEventKind, JobStatus, JobType};
use jobflow_recovery::{FailureContext, QuotaExceededError, SystemUnavailableError};

use crate::config::OrchestratorConfig;
use crate::error::JobError;
use crate::job::{CommandRegistry, CommandSlot, Job};
use crate::ports::{
    Clock, EventError, EventSink, ExecutorFactory, JobEvent, JobStore, MessageBus, RemoteExecutor,
    ResolveError, ResourceResolver, TransferClientFactory,
};
use crate::resource::{App, ExecSystem, LogicalQueue};

/// Collaborators shared by every worker in the process
pub struct Services {
    pub store: Arc<dyn JobStore>,
    pub executors: Arc<dyn ExecutorFactory>,
    pub transfers: Arc<dyn TransferClientFactory>,
    pub events: Arc<dyn EventSink>,
    pub bus: Arc<dyn MessageBus>,
    pub resolver: Arc<dyn ResourceResolver>,
    pub clock: Arc<dyn Clock>,
    pub commands: Arc<CommandRegistry>,
    pub config: OrchestratorConfig,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Named unit of work a stage runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activity {
    CheckSystems,
    StageInputs,
    StageJob,
    SubmitJob,
    MonitorQueued,
    Archive,
}

impl Activity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::CheckSystems => "CHECK_SYSTEMS",
            Activity::StageInputs => "STAGE_INPUTS",
            Activity::StageJob => "STAGE_JOB",
            Activity::SubmitJob => "SUBMIT_JOB",
            Activity::MonitorQueued => "MONITOR_QUEUED",
            Activity::Archive => "ARCHIVE",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installs generated files on the execution system
pub struct FileManager {
    executor: Arc<dyn RemoteExecutor>,
}

impl FileManager {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }

    /// Write `content` to `path` with `mode`, replacing any existing file
    pub fn install(&self, path: &str, content: &str, mode: u32) -> Result<(), JobError> {
        self.executor
            .put_file(path, content.as_bytes(), mode)
            .map_err(|e| {
                JobError::collaborator(
                    ConditionCode::JobUnableToStageJob,
                    format!("unable to install {}", path),
                    e,
                )
            })
    }
}

/// Per-episode aggregate passed to every stage
pub struct JobExecutionContext {
    services: Arc<Services>,
    job: Job,
    commands: Arc<CommandSlot>,
    exec_system: Option<ExecSystem>,
    archive_system: Option<ExecSystem>,
    app: Option<App>,
    executor: Option<Arc<dyn RemoteExecutor>>,
    activity: Activity,
}

impl JobExecutionContext {
    /// Start an episode for `job`, registering its command slot
    pub fn new(services: Arc<Services>, job: Job) -> Self {
        let commands = services.commands.register(job.uuid);
        Self {
            services,
            job,
            commands,
            exec_system: None,
            archive_system: None,
            app: None,
            executor: None,
            activity: Activity::CheckSystems,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.services.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.services.clock.as_ref()
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_mut(&mut self) -> &mut Job {
        &mut self.job
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn set_activity(&mut self, activity: Activity) {
        self.activity = activity;
    }

    /// Read and clear the pending async command
    pub fn take_command(&self) -> Option<AsyncCommand> {
        self.commands.take()
    }

    pub fn failure_context(&self) -> FailureContext {
        FailureContext {
            tenant: self.job.tenant.clone(),
            owner: self.job.owner.clone(),
            exec_system_id: self.job.exec_system_id.clone(),
        }
    }

    /// Persist the working copy
    pub fn save(&mut self) -> Result<(), JobError> {
        self.job.last_updated = self.services.clock.utc_now();
        self.services.store.save(&self.job)?;
        Ok(())
    }

    /// Move the job to `target`, persist it and emit a status event
    pub fn transition(&mut self, target: JobStatus) -> Result<(), JobError> {
        let now = self.services.clock.utc_now();
        let from = self.job.transition(target, now)?;
        self.services.store.save(&self.job)?;
        info!(job = %self.job.uuid, from = %from, to = %target, "job status changed");

        let event = JobEvent {
            job_uuid: self.job.uuid,
            tenant: self.job.tenant.clone(),
            kind: JobEventKind::StatusChange,
            status: target.as_str().to_string(),
            transfer_id: None,
            created: now,
        };
        self.record_event(|events| events.record(&event));
        Ok(())
    }

    /// Run a fire-and-forget event call, logging failures
    pub fn record_event(
        &self,
        call: impl FnOnce(&dyn EventSink) -> Result<(), EventError>,
    ) {
        if let Err(e) = call(self.services.events.as_ref()) {
            warn!(job = %self.job.uuid, error = %e, "unable to record job event");
        }
    }

    /// Set the condition code and capped last message, locally and in the store
    pub fn set_condition(&mut self, code: ConditionCode, message: &str) -> Result<(), JobError> {
        let max_len = self.services.config.worker.max_last_message_len;
        self.job.set_condition(code, message, max_len);
        let stored = self.job.last_message.as_deref().unwrap_or_default();
        self.services.store.set_condition(self.job.uuid, code, stored)?;
        Ok(())
    }

    /// Assign and persist the remote job id
    pub fn set_remote_job_id(&mut self, remote_job_id: &str) -> Result<(), JobError> {
        self.job.assign_remote_job_id(remote_job_id)?;
        self.job.remote_submitted = Some(self.services.clock.utc_now());
        self.services
            .store
            .set_remote_job_id(self.job.uuid, remote_job_id.trim())?;
        Ok(())
    }

    fn resolve_system(&self, system_id: &str) -> Result<ExecSystem, JobError> {
        let system = self
            .services
            .resolver
            .system(&self.job.tenant, system_id)
            .map_err(|e| resolve_failure(e, "system", system_id))?;

        if !system.enabled {
            return Err(JobError::collaborator(
                ConditionCode::JobInternalError,
                format!("system {} is not available", system_id),
                SystemUnavailableError {
                    tenant: self.job.tenant.clone(),
                    system_id: system.id.clone(),
                    owner: system.owner.clone(),
                    message: "system is disabled".to_string(),
                },
            ));
        }
        Ok(system)
    }

    /// Execution system, resolved on first use
    pub fn exec_system(&mut self) -> Result<&ExecSystem, JobError> {
        if self.exec_system.is_none() {
            let system = self.resolve_system(&self.job.exec_system_id.clone())?;
            self.exec_system = Some(system);
        }
        self.exec_system
            .as_ref()
            .ok_or_else(|| JobError::failed(ConditionCode::JobInternalError, "no exec system"))
    }

    /// Archive system, falling back to the execution system
    pub fn archive_system(&mut self) -> Result<&ExecSystem, JobError> {
        if self.archive_system.is_none() {
            let system = match self.job.archive_system_id.clone() {
                Some(id) if id != self.job.exec_system_id => self.resolve_system(&id)?,
                _ => self.exec_system()?.clone(),
            };
            self.archive_system = Some(system);
        }
        self.archive_system
            .as_ref()
            .ok_or_else(|| JobError::failed(ConditionCode::JobInternalError, "no archive system"))
    }

    /// Application definition, resolved on first use
    pub fn app(&mut self) -> Result<&App, JobError> {
        if self.app.is_none() {
            let app = self
                .services
                .resolver
                .app(&self.job.tenant, &self.job.app_id, &self.job.app_version)
                .map_err(|e| resolve_failure(e, "app", &self.job.app_id))?;
            self.app = Some(app);
        }
        self.app
            .as_ref()
            .ok_or_else(|| JobError::failed(ConditionCode::JobInternalError, "no app"))
    }

    /// Job type after applying the app default
    pub fn job_type(&mut self) -> Result<JobType, JobError> {
        let default = self.app()?.job_type;
        Ok(self.job.effective_job_type(default))
    }

    /// Executor connection to the execution system, opened on first use
    pub fn executor(&mut self) -> Result<Arc<dyn RemoteExecutor>, JobError> {
        if let Some(executor) = &self.executor {
            return Ok(executor.clone());
        }

        let system = self.exec_system()?.clone();
        let executor = self.services.executors.connect(&system).map_err(|e| {
            JobError::collaborator(
                ConditionCode::JobRemoteAccessError,
                format!("unable to connect to {}", system.host),
                e,
            )
        })?;
        self.executor = Some(executor.clone());
        Ok(executor)
    }

    /// Drop the cached connection so the next call reconnects
    pub fn reset_executor(&mut self) {
        self.executor = None;
    }

    pub fn file_manager(&mut self) -> Result<FileManager, JobError> {
        Ok(FileManager::new(self.executor()?))
    }

    /// Logical queue for a batch job, or `None` for fork jobs
    pub fn logical_queue(&mut self) -> Result<Option<LogicalQueue>, JobError> {
        if self.job_type()? != JobType::Batch {
            return Ok(None);
        }
        let wanted = self.job.exec_system_logical_queue.clone();
        let system = self.exec_system()?;
        match system.logical_queue(wanted.as_deref()) {
            Some(queue) => Ok(Some(queue.clone())),
            None => Err(JobError::Configuration(format!(
                "system {} has no logical queue {}",
                system.id,
                wanted.as_deref().unwrap_or("(default)")
            ))),
        }
    }

    /// Check the resource request against the queue limits
    pub fn validate_resources(&self, queue: &LogicalQueue) -> Result<(), JobError> {
        let r = &self.job.resources;
        let violations: Vec<String> = [
            (r.node_count as u64, queue.max_node_count as u64, "node_count"),
            (r.cores_per_node as u64, queue.max_cores_per_node as u64, "cores_per_node"),
            (r.memory_mb, queue.max_memory_mb, "memory_mb"),
            (r.max_minutes as u64, queue.max_minutes as u64, "max_minutes"),
        ]
        .iter()
        .filter(|(value, max, _)| value > max)
        .map(|(value, max, name)| format!("{} {} exceeds {}", name, value, max))
        .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(JobError::Configuration(format!(
                "queue {} limits: {}",
                queue.name,
                violations.join(", ")
            )))
        }
    }

    /// Raise the quota signal if another active job would exceed the queue limits
    pub fn check_quota(&mut self, queue: &LogicalQueue) -> Result<(), JobError> {
        let system_id = self.job.exec_system_id.clone();
        let store = &self.services.store;

        let active_jobs =
            store.count_active_jobs(&self.job.tenant, &system_id, &queue.name, None)?;
        let active_user_jobs = store.count_active_jobs(
            &self.job.tenant,
            &system_id,
            &queue.name,
            Some(&self.job.owner),
        )?;

        if active_jobs >= queue.max_jobs || active_user_jobs >= queue.max_jobs_per_user {
            return Err(JobError::collaborator(
                ConditionCode::JobLaunchFailure,
                format!("job quota reached on queue {}", queue.name),
                QuotaExceededError {
                    tenant: self.job.tenant.clone(),
                    system_id,
                    owner: self.job.owner.clone(),
                    queue: queue.name.clone(),
                    max_jobs: queue.max_jobs,
                    max_jobs_per_user: queue.max_jobs_per_user,
                    active_jobs,
                    active_user_jobs,
                },
            ));
        }
        Ok(())
    }
}

impl Drop for JobExecutionContext {
    fn drop(&mut self) {
        self.services.commands.unregister(self.job.uuid);
    }
}

fn resolve_failure(error: ResolveError, kind: &str, id: &str) -> JobError {
    match error {
        ResolveError::NotFound { .. } => JobError::failed(
            ConditionCode::JobInvalidDefinition,
            format!("{} {} not found", kind, id),
        ),
        other => JobError::collaborator(
            ConditionCode::JobInternalError,
            format!("unable to resolve {} {}", kind, id),
            other,
        ),
    }
}
