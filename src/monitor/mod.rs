//! Polling loops
//!
//! Both loops are driven by a [`jobflow_recovery::BackoffState`] built fresh
//! for every call, sleep through the context's clock and look at the job's
//! async command slot before each remote call.

pub mod remote;
mod transfer;

pub use remote::{monitor_remote_job, RemoteJobMonitor};
pub use transfer::{monitor_transfer, TransferKind};

use jobflow_protocol::AsyncCommand;
use jobflow_recovery::PolicyError;
use tracing::info;

use crate::context::JobExecutionContext;
use crate::error::JobError;

/// Pending async command as the error that stops the loop
pub(crate) fn check_command(ctx: &JobExecutionContext) -> Result<(), JobError> {
    match ctx.take_command() {
        None => Ok(()),
        Some(command) => {
            info!(job = %ctx.job().uuid, %command, "async command received");
            Err(match command {
                AsyncCommand::Cancel => JobError::Cancelled,
                AsyncCommand::Pause => JobError::Paused,
            })
        }
    }
}

pub(crate) fn invalid_policy(name: &str, error: PolicyError) -> JobError {
    JobError::Configuration(format!("monitor.{} policy: {}", name, error))
}
