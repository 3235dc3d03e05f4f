//! Recovery messages published when a job is parked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

use jobflow_protocol::JobStatus;

use crate::backoff::BackoffPolicy;
use crate::error::{RecoverableError, RecoveryCategory};

/// Errors building a recovery message
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("JCS serialization error: {0}")]
    Jcs(String),

    #[error("job cannot be parked from status {0}")]
    NotParkable(JobStatus),
}

/// Equivalence key for recoverable failures.
///
/// SHA-256 hex digest of the JCS form of `{category, tester_params, policy}`.
/// Two failures with the same key are the same root cause and retry on the
/// same schedule. The policy is part of the key because SSH authentication
/// picks its schedule from the job activity, which the tester params omit.
pub fn fingerprint(
    category: RecoveryCategory,
    tester_params: &BTreeMap<String, String>,
    policy: &BackoffPolicy,
) -> Result<String, RecordError> {
    #[derive(Serialize)]
    struct Key<'a> {
        category: RecoveryCategory,
        tester_params: &'a BTreeMap<String, String>,
        policy: &'a BackoffPolicy,
    }

    let jcs_bytes = serde_json_canonicalizer::to_vec(&Key {
        category,
        tester_params,
        policy,
    })
    .map_err(|e| RecordError::Jcs(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(&jcs_bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// A parked job handed to the recovery manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryMessage {
    pub job_uuid: Uuid,
    pub tenant: String,
    pub category: RecoveryCategory,
    pub message: String,
    /// Failure state without the activity stamp
    pub tester_params: BTreeMap<String, String>,
    /// Activity in progress when the job failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_activity: Option<String>,
    pub policy: BackoffPolicy,
    pub fingerprint: String,
    /// Status the job resumes in once the condition clears
    pub blocked_from: JobStatus,
    pub created: DateTime<Utc>,
}

impl RecoveryMessage {
    /// Build the message for a job parked in `blocked_from`
    pub fn from_error(
        job_uuid: Uuid,
        tenant: impl Into<String>,
        blocked_from: JobStatus,
        error: &RecoverableError,
        created: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        if !blocked_from.is_active() {
            return Err(RecordError::NotParkable(blocked_from));
        }

        let tester_params = error.tester_params();
        let policy = error.backoff_policy();
        let fingerprint = fingerprint(error.category, &tester_params, &policy)?;

        Ok(Self {
            job_uuid,
            tenant: tenant.into(),
            category: error.category,
            message: error.message.clone(),
            tester_params,
            job_activity: error.job_activity().map(str::to_string),
            policy,
            fingerprint,
            blocked_from,
            created,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
