//! Transient failure classification.
//!
//! Walks an error's `source()` chain looking for the signal types in
//! [`crate::signals`]. Categories are tested in [`RecoveryCategory::PRIORITY`]
//! order and the first one found anywhere in the chain wins.

use std::error::Error;

use crate::capture::{
    capture_app_state, capture_quota_state, capture_service_state, capture_ssh_state,
    capture_system_state,
};
use crate::error::{RecoverableError, RecoveryCategory};
use crate::signals::{
    AppUnavailableError, QuotaExceededError, ServiceConnectionError, SshError, SshFailureKind,
    SystemUnavailableError,
};

/// Job attributes the classifier needs when a signal does not carry them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureContext {
    pub tenant: String,
    /// Job owner
    pub owner: String,
    /// Execution system the job runs on
    pub exec_system_id: String,
}

/// Iterate over an error and all of its sources, outermost first
pub fn error_chain<'a>(
    error: &'a (dyn Error + 'static),
) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(error), |&e| e.source())
}

fn find<'a, T: Error + 'static>(error: &'a (dyn Error + 'static)) -> Option<&'a T> {
    error_chain(error).find_map(|e| e.downcast_ref::<T>())
}

fn find_ssh<'a>(
    error: &'a (dyn Error + 'static),
    kind: SshFailureKind,
) -> Option<&'a SshError> {
    error_chain(error)
        .filter_map(|e| e.downcast_ref::<SshError>())
        .find(|ssh| ssh.kind == kind)
}

/// Convert a failure into a recoverable error, or `None` if it is permanent.
///
/// A [`RecoverableError`] already present in the chain is returned as is.
pub fn classify_chain(
    error: &(dyn Error + 'static),
    ctx: &FailureContext,
) -> Option<RecoverableError> {
    if let Some(existing) = find::<RecoverableError>(error) {
        return Some(existing.clone());
    }

    RecoveryCategory::PRIORITY
        .iter()
        .find_map(|&category| match_category(error, category, ctx))
}

fn match_category(
    error: &(dyn Error + 'static),
    category: RecoveryCategory,
    ctx: &FailureContext,
) -> Option<RecoverableError> {
    match category {
        RecoveryCategory::ServiceConnection => {
            let e = find::<ServiceConnectionError>(error)?;
            Some(RecoverableError::new(
                category,
                e.to_string(),
                capture_service_state(&ctx.tenant, &e.service),
            ))
        }
        RecoveryCategory::SystemUnavailable => {
            let e = find::<SystemUnavailableError>(error)?;
            Some(RecoverableError::new(
                category,
                e.to_string(),
                capture_system_state(&e.tenant, &e.system_id, &e.owner),
            ))
        }
        RecoveryCategory::AppUnavailable => {
            let e = find::<AppUnavailableError>(error)?;
            Some(RecoverableError::new(
                category,
                e.to_string(),
                capture_app_state(&e.tenant, &e.app_id, &e.app_version, &e.owner),
            ))
        }
        RecoveryCategory::Quota => {
            let e = find::<QuotaExceededError>(error)?;
            Some(RecoverableError::new(
                category,
                e.to_string(),
                capture_quota_state(
                    &e.tenant,
                    &e.system_id,
                    &e.owner,
                    &e.queue,
                    e.max_jobs,
                    e.max_jobs_per_user,
                ),
            ))
        }
        RecoveryCategory::SshConnection => ssh(error, SshFailureKind::Connection, category, ctx),
        RecoveryCategory::SshTimeout => ssh(error, SshFailureKind::Timeout, category, ctx),
        RecoveryCategory::SshAuthentication => {
            ssh(error, SshFailureKind::Authentication, category, ctx)
        }
    }
}

fn ssh(
    error: &(dyn Error + 'static),
    kind: SshFailureKind,
    category: RecoveryCategory,
    ctx: &FailureContext,
) -> Option<RecoverableError> {
    let e = find_ssh(error, kind)?;
    Some(RecoverableError::new(
        category,
        e.to_string(),
        capture_ssh_state(&ctx.tenant, &ctx.exec_system_id, &e.host, e.port, &e.user),
    ))
}
