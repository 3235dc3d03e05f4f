//! Recovery subsystem for jobflow.
//!
//! Turns transient infrastructure failures into scheduled retries:
//! - [`backoff`]: stepwise retry-interval engine used by every polling loop
//! - [`signals`]: failure types collaborators raise for transient conditions
//! - [`classify_chain`]: maps an error chain to a [`RecoverableError`]
//! - [`capture`]: tester-parameter capture defining failure equivalence
//! - [`RecoveryMessage`] / [`RecoveryManager`]: records shared by all jobs
//!   blocked on one root cause

pub mod backoff;
pub mod capture;
mod classify;
mod error;
mod manager;
mod record;
pub mod signals;

pub use backoff::{BackoffPolicy, BackoffState, BackoffStep, Exhausted, PolicyError};
pub use classify::{classify_chain, error_chain, FailureContext};
pub use error::{RecoverableError, RecoveryCategory};
pub use manager::{
    AddOutcome, AttemptOutcome, DueRecord, RecordSummary, RecoveryManager, RecoveryRecord,
};
pub use record::{fingerprint, RecordError, RecoveryMessage};
pub use signals::{
    AppUnavailableError, QuotaExceededError, ServiceConnectionError, SshError, SshFailureKind,
    SystemUnavailableError,
};
