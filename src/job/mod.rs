//! Job record and status transitions
//!
//! The job record is owned by the job store; a worker holds a copy for the
//! duration of one execution episode and writes changes back through the
//! store. Status moves only through [`Job::transition`].

mod command;

pub use command::{CommandRegistry, CommandSlot, Delivery};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use jobflow_protocol::{ConditionCode, JobStatus, JobType, RemoteOutcome};

/// Default cap on `last_message`, in characters
pub const DEFAULT_MAX_LAST_MESSAGE_LEN: usize = 16384;

/// Resource request of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub node_count: u32,
    pub cores_per_node: u32,
    pub memory_mb: u64,
    pub max_minutes: u32,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            node_count: 1,
            cores_per_node: 1,
            memory_mb: 100,
            max_minutes: 10,
        }
    }
}

/// One input file to stage before the job runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInput {
    pub source_url: String,
    /// Path relative to the exec system input dir
    pub target_path: String,
}

/// Errors for job record operations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("blocked job can only resume in {expected:?}, not {requested}")]
    WrongResumeStage {
        expected: Option<JobStatus>,
        requested: JobStatus,
    },

    #[error("remote job id already assigned: {0}")]
    RemoteJobIdAssigned(String),

    #[error("remote job id must not be blank")]
    BlankRemoteJobId,
}

/// The persisted job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub uuid: Uuid,
    pub tenant: String,
    pub owner: String,
    pub name: String,
    pub status: JobStatus,

    pub created: DateTime<Utc>,
    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,

    pub app_id: String,
    pub app_version: String,
    /// Overrides the app's default job type
    #[serde(default)]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub resources: ResourceRequest,
    #[serde(default)]
    pub app_args: Vec<String>,
    #[serde(default)]
    pub env_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub file_inputs: Vec<FileInput>,

    // Placement
    pub exec_system_id: String,
    pub exec_system_exec_dir: String,
    pub exec_system_input_dir: String,
    pub exec_system_output_dir: String,
    #[serde(default)]
    pub exec_system_logical_queue: Option<String>,
    #[serde(default)]
    pub archive_system_id: Option<String>,
    #[serde(default)]
    pub archive_system_dir: Option<String>,
    /// Data transfer node used instead of the exec system for transfers
    #[serde(default)]
    pub dtn_system_id: Option<String>,
    #[serde(default)]
    pub dtn_mount_point: Option<String>,
    /// Archive outputs even when the application fails
    #[serde(default)]
    pub archive_on_app_error: bool,

    // Remote tracking
    #[serde(default)]
    pub remote_job_id: Option<String>,
    #[serde(default)]
    pub remote_outcome: Option<RemoteOutcome>,
    #[serde(default)]
    pub remote_result_info: Option<String>,
    #[serde(default)]
    pub remote_submitted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remote_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remote_ended: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remote_checks_success: u32,
    #[serde(default)]
    pub remote_checks_failed: u32,
    #[serde(default)]
    pub remote_last_status_check: Option<DateTime<Utc>>,

    // Transfers
    #[serde(default)]
    pub input_transaction_id: Option<String>,
    #[serde(default)]
    pub archive_transaction_id: Option<String>,

    // Stop reason
    #[serde(default)]
    pub condition: Option<ConditionCode>,
    #[serde(default)]
    pub last_message: Option<String>,

    /// Stage a BLOCKED job resumes in
    #[serde(default)]
    pub blocked_from: Option<JobStatus>,
}

impl Job {
    /// New PENDING job with directories under `/<exec root>/jobs/<uuid>`
    pub fn new(
        tenant: impl Into<String>,
        owner: impl Into<String>,
        app_id: impl Into<String>,
        app_version: impl Into<String>,
        exec_system_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let uuid = Uuid::new_v4();
        let exec_dir = format!("jobs/{}", uuid);
        let app_id = app_id.into();

        Self {
            uuid,
            tenant: tenant.into(),
            owner: owner.into(),
            name: app_id.clone(),
            status: JobStatus::Pending,
            created: now,
            ended: None,
            last_updated: now,
            app_id,
            app_version: app_version.into(),
            job_type: None,
            resources: ResourceRequest::default(),
            app_args: Vec::new(),
            env_variables: BTreeMap::new(),
            file_inputs: Vec::new(),
            exec_system_id: exec_system_id.into(),
            exec_system_input_dir: format!("{}/input", exec_dir),
            exec_system_output_dir: format!("{}/output", exec_dir),
            exec_system_exec_dir: exec_dir,
            exec_system_logical_queue: None,
            archive_system_id: None,
            archive_system_dir: None,
            dtn_system_id: None,
            dtn_mount_point: None,
            archive_on_app_error: false,
            remote_job_id: None,
            remote_outcome: None,
            remote_result_info: None,
            remote_submitted: None,
            remote_started: None,
            remote_ended: None,
            remote_checks_success: 0,
            remote_checks_failed: 0,
            remote_last_status_check: None,
            input_transaction_id: None,
            archive_transaction_id: None,
            condition: None,
            last_message: None,
            blocked_from: None,
        }
    }

    /// Move to `target`.
    ///
    /// Entering BLOCKED records the current status in `blocked_from`; the only
    /// non-failure exit from BLOCKED is back to that status.
    pub fn transition(
        &mut self,
        target: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<JobStatus, TransitionError> {
        let from = self.status;
        if !from.can_transition_to(target) {
            return Err(TransitionError::InvalidTransition { from, to: target });
        }

        if from == JobStatus::Blocked && !target.is_terminal() && self.blocked_from != Some(target)
        {
            return Err(TransitionError::WrongResumeStage {
                expected: self.blocked_from,
                requested: target,
            });
        }

        match target {
            JobStatus::Blocked => self.blocked_from = Some(from),
            _ => self.blocked_from = None,
        }
        if target.is_terminal() {
            self.ended = Some(now);
        }
        self.status = target;
        self.last_updated = now;

        Ok(from)
    }

    /// Job type, falling back to the app default
    pub fn effective_job_type(&self, app_default: JobType) -> JobType {
        self.job_type.unwrap_or(app_default)
    }

    /// Record the remote id once per submission
    pub fn assign_remote_job_id(&mut self, id: &str) -> Result<(), TransitionError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(TransitionError::BlankRemoteJobId);
        }
        if let Some(existing) = &self.remote_job_id {
            return Err(TransitionError::RemoteJobIdAssigned(existing.clone()));
        }
        self.remote_job_id = Some(id.to_string());
        Ok(())
    }

    /// Remote id, if assigned and non-blank
    pub fn remote_job_id(&self) -> Option<&str> {
        self.remote_job_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Set `last_message`, truncated to `max_len` characters
    pub fn set_last_message(&mut self, message: &str, max_len: usize) {
        self.last_message = Some(truncate_chars(message, max_len));
    }

    pub fn set_condition(&mut self, code: ConditionCode, message: &str, max_len: usize) {
        self.condition = Some(code);
        self.set_last_message(message, max_len);
    }
}

fn truncate_chars(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
