//! Collaborator interfaces
//!
//! The orchestrator core talks to the outside world only through these
//! traits. Production adapters live elsewhere ([`crate::ssh`] for the remote
//! executor); in-memory versions live in [`crate::mock`].
//!
//! Collaborator errors keep transient signal types (see
//! [`jobflow_recovery::signals`]) reachable through `source()` so the
//! classifier can find them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use jobflow_protocol::{ConditionCode, JobEventKind, TransferRequest, TransferTask};
use jobflow_recovery::{
    AppUnavailableError, ServiceConnectionError, SshError, SystemUnavailableError,
};

use crate::job::Job;
use crate::resource::{App, ExecSystem};

// ============================================================================
// Job store
// ============================================================================

/// Job store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

/// Durable, per-job consistent job persistence
pub trait JobStore: Send + Sync {
    fn load(&self, uuid: Uuid) -> Result<Job, StoreError>;

    fn save(&self, job: &Job) -> Result<(), StoreError>;

    fn set_remote_job_id(&self, uuid: Uuid, remote_job_id: &str) -> Result<(), StoreError>;

    fn set_condition(
        &self,
        uuid: Uuid,
        code: ConditionCode,
        last_message: &str,
    ) -> Result<(), StoreError>;

    /// Active jobs on a system queue, optionally for one owner
    fn count_active_jobs(
        &self,
        tenant: &str,
        system_id: &str,
        queue: &str,
        owner: Option<&str>,
    ) -> Result<u32, StoreError>;
}

// ============================================================================
// Remote command executor
// ============================================================================

/// Result of a remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// Combined stdout and stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Remote execution errors
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("{0}")]
    Ssh(#[from] SshError),

    #[error("remote I/O error: {0}")]
    Io(String),
}

/// SSH-like command execution over a per-job connection
pub trait RemoteExecutor: Send + Sync {
    fn execute(&self, command: &str) -> Result<CommandOutput, ExecError>;

    /// Write a file on the remote host, relative to the login directory
    fn put_file(&self, path: &str, content: &[u8], mode: u32) -> Result<(), ExecError>;

    /// Cheap liveness check
    fn ping(&self) -> Result<(), ExecError> {
        self.execute("true").map(|_| ())
    }
}

/// Opens executor connections to systems
pub trait ExecutorFactory: Send + Sync {
    fn connect(&self, system: &ExecSystem) -> Result<Arc<dyn RemoteExecutor>, ExecError>;
}

// ============================================================================
// Transfer service
// ============================================================================

/// Transfer service errors
#[derive(Debug, thiserror::Error)]
pub enum TransferClientError {
    #[error("{0}")]
    Connection(#[from] ServiceConnectionError),

    #[error("transfer service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transfer service protocol error: {0}")]
    Protocol(String),
}

impl TransferClientError {
    /// Connectivity problems are worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransferClientError::Connection(_))
    }
}

/// Client for the external transfer service
pub trait TransferClient: Send + Sync {
    fn get_transfer_task(&self, transfer_id: &str) -> Result<TransferTask, TransferClientError>;

    fn create_transfer(&self, request: &TransferRequest)
        -> Result<TransferTask, TransferClientError>;

    fn cancel_transfer(&self, transfer_id: &str) -> Result<(), TransferClientError>;

    fn ping(&self) -> Result<(), TransferClientError>;
}

/// Hands out clients with freshly valid credentials
pub trait TransferClientFactory: Send + Sync {
    fn client(&self, tenant: &str, user: &str)
        -> Result<Arc<dyn TransferClient>, TransferClientError>;
}

// ============================================================================
// Event sink
// ============================================================================

/// Lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_uuid: Uuid,
    pub tenant: String,
    pub kind: JobEventKind,
    /// Status text, e.g. the transfer status or the new job status
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
#[error("event sink error: {0}")]
pub struct EventError(pub String);

/// Fire-and-forget notifications; callers log failures and move on
pub trait EventSink: Send + Sync {
    fn record(&self, event: &JobEvent) -> Result<(), EventError>;

    fn record_staging_inputs_event(
        &self,
        job: &Job,
        status: &str,
        transfer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EventError> {
        self.record(&transfer_event(job, JobEventKind::StagingInputs, status, transfer_id, now))
    }

    fn record_archiving_event(
        &self,
        job: &Job,
        status: &str,
        transfer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EventError> {
        self.record(&transfer_event(job, JobEventKind::Archiving, status, transfer_id, now))
    }
}

fn transfer_event(
    job: &Job,
    kind: JobEventKind,
    status: &str,
    transfer_id: &str,
    now: DateTime<Utc>,
) -> JobEvent {
    JobEvent {
        job_uuid: job.uuid,
        tenant: job.tenant.clone(),
        kind,
        status: status.to_string(),
        transfer_id: Some(transfer_id.to_string()),
        created: now,
    }
}

// ============================================================================
// Message bus
// ============================================================================

/// Queues the core publishes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Queue {
    /// Jobs ready for a worker to pick up
    Job,
    /// Recovery messages for parked jobs
    Recovery,
    /// Lifecycle events
    Event,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::Job => "job",
            Queue::Recovery => "recovery",
            Queue::Event => "event",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("{0}")]
    Connection(#[from] ServiceConnectionError),

    #[error("message rejected by {queue}: {message}")]
    Rejected { queue: &'static str, message: String },
}

/// Message bus publish/consume
pub trait MessageBus: Send + Sync {
    fn publish(&self, queue: Queue, payload: &str) -> Result<(), BusError>;

    /// Remove and return every message currently on `queue`
    fn drain(&self, queue: Queue) -> Result<Vec<String>, BusError>;
}

// ============================================================================
// Systems and apps metadata
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("{0}")]
    SystemUnavailable(#[from] SystemUnavailableError),

    #[error("{0}")]
    AppUnavailable(#[from] AppUnavailableError),

    #[error("{0}")]
    Connection(#[from] ServiceConnectionError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

/// Systems and apps lookup
pub trait ResourceResolver: Send + Sync {
    fn system(&self, tenant: &str, system_id: &str) -> Result<ExecSystem, ResolveError>;

    fn app(&self, tenant: &str, app_id: &str, version: &str) -> Result<App, ResolveError>;
}

// ============================================================================
// Clock
// ============================================================================

/// Time source; polling loops sleep through it
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn utc_now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration);
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}
