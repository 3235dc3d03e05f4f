//! Transient failure signals.
//!
//! Collaborators (service clients, metadata resolvers, the quota check, the
//! SSH executor) raise these types, or keep them reachable through
//! `Error::source()`, when a failure is believed to be temporary. The
//! classifier finds them by walking the error chain.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dependent service could not be reached
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{service} service unreachable: {message}")]
pub struct ServiceConnectionError {
    /// Logical service name, e.g. `files`
    pub service: String,
    pub message: String,
}

impl ServiceConnectionError {
    pub fn new(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// An execution or archive system is disabled or unreachable through its
/// metadata service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("system {system_id} unavailable for tenant {tenant}: {message}")]
pub struct SystemUnavailableError {
    pub tenant: String,
    pub system_id: String,
    /// Owner of the system record
    pub owner: String,
    pub message: String,
}

/// An application definition is disabled or unavailable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("app {app_id}-{app_version} unavailable for tenant {tenant}: {message}")]
pub struct AppUnavailableError {
    pub tenant: String,
    pub app_id: String,
    pub app_version: String,
    /// Owner of the app record
    pub owner: String,
    pub message: String,
}

/// Submitting the job would exceed a system or queue job limit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "job quota exceeded on {system_id} queue {queue} for {owner}: \
     {active_jobs}/{max_jobs} jobs, {active_user_jobs}/{max_jobs_per_user} for user"
)]
pub struct QuotaExceededError {
    pub tenant: String,
    pub system_id: String,
    pub owner: String,
    /// Logical queue name
    pub queue: String,
    pub max_jobs: u32,
    pub max_jobs_per_user: u32,
    /// Counts observed when the check failed; not part of equivalence
    pub active_jobs: u32,
    pub active_user_jobs: u32,
}

/// Which part of an SSH exchange failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SshFailureKind {
    /// Host unreachable, connection refused or reset
    Connection,
    /// Connect or command timed out
    Timeout,
    /// Credentials rejected
    Authentication,
}

impl fmt::Display for SshFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshFailureKind::Connection => f.write_str("connection"),
            SshFailureKind::Timeout => f.write_str("timeout"),
            SshFailureKind::Authentication => f.write_str("authentication"),
        }
    }
}

/// SSH failure raised by the remote command executor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ssh {kind} failure for {user}@{host}:{port}: {message}")]
pub struct SshError {
    pub kind: SshFailureKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub message: String,
    /// Credential or key service outage behind the SSH failure
    #[source]
    pub cause: Option<ServiceConnectionError>,
}

impl SshError {
    pub fn new(
        kind: SshFailureKind,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            user: user.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: ServiceConnectionError) -> Self {
        self.cause = Some(cause);
        self
    }
}
