//! Recovery scheduler
//!
//! Drains recovery messages published by workers into a
//! [`RecoveryManager`], then periodically re-tests each record's condition.
//! When the condition clears every job parked on it goes back to the stage
//! it left and onto the job queue; when the record's backoff runs out the
//! jobs fail with JOB_RECOVERY_TIMEOUT.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use jobflow_protocol::{ConditionCode, JobStatus};
use jobflow_recovery::capture::keys;
use jobflow_recovery::{
    AttemptOutcome, DueRecord, RecoveryCategory, RecoveryManager, RecoveryMessage,
};

use crate::context::Services;
use crate::error::JobError;
use crate::ports::Queue;

/// Checks whether the condition behind a recovery record has cleared
pub trait RecoveryTester: Send + Sync {
    /// `Ok(())` when the condition is gone; otherwise why it persists
    fn test(&self, services: &Services, record: &DueRecord) -> Result<(), String>;
}

fn param<'a>(record: &'a DueRecord, key: &str) -> Result<&'a str, String> {
    record
        .tester_params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| format!("recovery record has no {}", key))
}

fn numeric_param(record: &DueRecord, key: &str) -> Result<u32, String> {
    param(record, key)?
        .parse()
        .map_err(|e| format!("bad {}: {}", key, e))
}

/// A transfer client can be obtained and answers
#[derive(Debug, Clone, Copy)]
pub struct ServiceTester;

impl RecoveryTester for ServiceTester {
    fn test(&self, services: &Services, record: &DueRecord) -> Result<(), String> {
        let tenant = param(record, keys::TENANT)?;
        let client = services
            .transfers
            .client(tenant, "jobflow")
            .map_err(|e| e.to_string())?;
        client.ping().map_err(|e| e.to_string())
    }
}

/// The system resolves and is enabled
#[derive(Debug, Clone, Copy)]
pub struct SystemTester;

impl RecoveryTester for SystemTester {
    fn test(&self, services: &Services, record: &DueRecord) -> Result<(), String> {
        let tenant = param(record, keys::TENANT)?;
        let system_id = param(record, keys::SYSTEM_ID)?;
        let system = services
            .resolver
            .system(tenant, system_id)
            .map_err(|e| e.to_string())?;
        if system.enabled {
            Ok(())
        } else {
            Err(format!("system {} is still disabled", system_id))
        }
    }
}

/// The app resolves and is enabled
#[derive(Debug, Clone, Copy)]
pub struct AppTester;

impl RecoveryTester for AppTester {
    fn test(&self, services: &Services, record: &DueRecord) -> Result<(), String> {
        let tenant = param(record, keys::TENANT)?;
        let app_id = param(record, keys::APP_ID)?;
        let version = param(record, keys::APP_VERSION)?;
        let app = services
            .resolver
            .app(tenant, app_id, version)
            .map_err(|e| e.to_string())?;
        if app.enabled {
            Ok(())
        } else {
            Err(format!("app {} is still disabled", app.label()))
        }
    }
}

/// Active job counts are below the queue thresholds
#[derive(Debug, Clone, Copy)]
pub struct QuotaTester;

impl RecoveryTester for QuotaTester {
    fn test(&self, services: &Services, record: &DueRecord) -> Result<(), String> {
        let tenant = param(record, keys::TENANT)?;
        let system_id = param(record, keys::SYSTEM_ID)?;
        let owner = param(record, keys::OWNER)?;
        let queue = param(record, keys::QUEUE)?;
        let max_jobs = numeric_param(record, keys::MAX_JOBS)?;
        let max_jobs_per_user = numeric_param(record, keys::MAX_JOBS_PER_USER)?;

        let store = &services.store;
        let active = store
            .count_active_jobs(tenant, system_id, queue, None)
            .map_err(|e| e.to_string())?;
        let active_user = store
            .count_active_jobs(tenant, system_id, queue, Some(owner))
            .map_err(|e| e.to_string())?;

        if active < max_jobs && active_user < max_jobs_per_user {
            Ok(())
        } else {
            Err(format!(
                "queue {} still full: {}/{} jobs, {}/{} for {}",
                queue, active, max_jobs, active_user, max_jobs_per_user, owner
            ))
        }
    }
}

/// A new connection to the host succeeds and runs a command
#[derive(Debug, Clone, Copy)]
pub struct SshTester;

impl RecoveryTester for SshTester {
    fn test(&self, services: &Services, record: &DueRecord) -> Result<(), String> {
        let tenant = param(record, keys::TENANT)?;
        let system_id = param(record, keys::SYSTEM_ID)?;
        let mut system = services
            .resolver
            .system(tenant, system_id)
            .map_err(|e| e.to_string())?;

        // Test the endpoint that failed, not whatever the system says today
        system.host = param(record, keys::HOST)?.to_string();
        system.port = param(record, keys::PORT)?
            .parse()
            .map_err(|e| format!("bad port: {}", e))?;
        system.effective_user = param(record, keys::USER)?.to_string();

        let executor = services
            .executors
            .connect(&system)
            .map_err(|e| e.to_string())?;
        executor.ping().map_err(|e| e.to_string())
    }
}

pub fn tester_for(category: RecoveryCategory) -> Box<dyn RecoveryTester> {
    match category {
        RecoveryCategory::ServiceConnection => Box::new(ServiceTester),
        RecoveryCategory::SystemUnavailable => Box::new(SystemTester),
        RecoveryCategory::AppUnavailable => Box::new(AppTester),
        RecoveryCategory::Quota => Box::new(QuotaTester),
        RecoveryCategory::SshConnection
        | RecoveryCategory::SshTimeout
        | RecoveryCategory::SshAuthentication => Box::new(SshTester),
    }
}

/// What one scheduling pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs moved back to their stage and requeued
    pub resumed: Vec<Uuid>,
    /// Jobs failed because their record expired
    pub expired: Vec<Uuid>,
    /// Records tested without success and rescheduled
    pub rescheduled: usize,
}

/// Owns the recovery records of one process
#[derive(Debug)]
pub struct Recoverer {
    services: Arc<Services>,
    manager: RecoveryManager,
}

impl Recoverer {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            manager: RecoveryManager::new(),
        }
    }

    pub fn manager(&self) -> &RecoveryManager {
        &self.manager
    }

    /// Move every message on the recovery queue into the manager
    pub fn drain(&self) -> Result<usize, JobError> {
        let payloads = self.services.bus.drain(Queue::Recovery).map_err(|e| {
            JobError::collaborator(
                ConditionCode::JobInternalError,
                "unable to read recovery queue",
                e,
            )
        })?;

        let now = self.services.clock.now();
        let mut added = 0;
        for payload in payloads {
            match RecoveryMessage::from_json(&payload) {
                Ok(message) => {
                    let job_uuid = message.job_uuid;
                    let outcome = self.manager.add(message, now);
                    debug!(job = %job_uuid, record_id = %outcome.record_id(), "recovery message added");
                    added += 1;
                }
                Err(e) => warn!(error = %e, "dropping malformed recovery message"),
            }
        }
        Ok(added)
    }

    /// Test every record that is due at `now`
    pub fn run_due(&self, now: Instant) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        for due in self.manager.due(now) {
            match tester_for(due.category).test(&self.services, &due) {
                Ok(()) => {
                    if let Some(record) = self.manager.attempt_succeeded(&due.fingerprint) {
                        for (uuid, blocked_from) in record.blocked_jobs {
                            match self.resume(uuid, blocked_from) {
                                Ok(true) => report.resumed.push(uuid),
                                Ok(false) => {}
                                Err(e) => error!(job = %uuid, error = %e, "unable to resume job"),
                            }
                        }
                    }
                }
                Err(reason) => {
                    debug!(category = %due.category, %reason, "recovery condition persists");
                    match self.manager.attempt_failed(&due.fingerprint, now) {
                        Some(AttemptOutcome::Rescheduled(_)) => report.rescheduled += 1,
                        Some(AttemptOutcome::Expired { record, reason }) => {
                            let message = format!(
                                "recovery from {} gave up ({}): {}",
                                record.category, reason, due.fingerprint
                            );
                            for uuid in record.blocked_jobs.keys() {
                                match self.expire(*uuid, &message) {
                                    Ok(true) => report.expired.push(*uuid),
                                    Ok(false) => {}
                                    Err(e) => {
                                        error!(job = %uuid, error = %e, "unable to fail job")
                                    }
                                }
                            }
                        }
                        None => {}
                    }
                }
            }
        }
        report
    }

    /// Run a pass at the clock's current time
    pub fn run_once(&self) -> Result<RecoveryReport, JobError> {
        self.drain()?;
        Ok(self.run_due(self.services.clock.now()))
    }

    /// Cancel a job that is parked for recovery
    pub fn cancel_blocked(&self, uuid: Uuid) -> Result<bool, JobError> {
        let removed = self.manager.remove_job(uuid);
        let mut job = self.services.store.load(uuid)?;
        if job.status != JobStatus::Blocked {
            return Ok(false);
        }
        let max_len = self.services.config.worker.max_last_message_len;
        job.set_condition(ConditionCode::CancelledByUser, "job cancelled by user", max_len);
        job.transition(JobStatus::Cancelled, self.services.clock.utc_now())?;
        self.services.store.save(&job)?;
        info!(job = %uuid, had_record = removed, "blocked job cancelled");
        Ok(true)
    }

    /// Put a blocked job back in its stage and requeue it
    fn resume(&self, uuid: Uuid, blocked_from: JobStatus) -> Result<bool, JobError> {
        let mut job = self.services.store.load(uuid)?;
        if job.status != JobStatus::Blocked {
            debug!(job = %uuid, status = %job.status, "job left BLOCKED meanwhile");
            return Ok(false);
        }

        job.transition(blocked_from, self.services.clock.utc_now())?;
        self.services.store.save(&job)?;
        self.services
            .bus
            .publish(Queue::Job, &uuid.to_string())
            .map_err(|e| {
                JobError::collaborator(ConditionCode::JobInternalError, "unable to requeue job", e)
            })?;
        info!(job = %uuid, status = %blocked_from, "job resumed from recovery");
        Ok(true)
    }

    fn expire(&self, uuid: Uuid, message: &str) -> Result<bool, JobError> {
        let mut job = self.services.store.load(uuid)?;
        if job.status != JobStatus::Blocked {
            return Ok(false);
        }
        let max_len = self.services.config.worker.max_last_message_len;
        job.set_condition(ConditionCode::JobRecoveryTimeout, message, max_len);
        job.transition(JobStatus::Failed, self.services.clock.utc_now())?;
        self.services.store.save(&job)?;
        warn!(job = %uuid, "job failed after recovery timeout");
        Ok(true)
    }
}
