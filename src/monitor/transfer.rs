//! Transfer monitor
//!
//! Polls the transfer service until a transfer reaches a terminal status.
//! A new client is requested every cycle so long polls never run on stale
//! credentials. Connectivity errors feed the backoff failure series instead
//! of failing the loop; once the series lasts too long the last one is
//! raised so the worker can park the job.

use std::fmt;
use tracing::{debug, info, warn};

use jobflow_protocol::{ConditionCode, TransferStatus, TransferTask};
use jobflow_recovery::Exhausted;

use super::{check_command, invalid_policy};
use crate::context::JobExecutionContext;
use crate::error::JobError;
use crate::ports::TransferClientError;

/// Which transfer of the job is being watched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Inputs,
    Archive,
}

impl TransferKind {
    /// Condition for failures that are neither timeouts nor transfer verdicts
    fn failure_condition(&self) -> ConditionCode {
        match self {
            TransferKind::Inputs => ConditionCode::JobUnableToStageInputs,
            TransferKind::Archive => ConditionCode::JobArchivingFailed,
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Inputs => f.write_str("inputs"),
            TransferKind::Archive => f.write_str("archive"),
        }
    }
}

fn fetch(ctx: &JobExecutionContext, transfer_id: &str) -> Result<TransferTask, TransferClientError> {
    let job = ctx.job();
    let client = ctx.services().transfers.client(&job.tenant, &job.owner)?;
    client.get_transfer_task(transfer_id)
}

fn cancel_transfer(ctx: &JobExecutionContext, transfer_id: &str) {
    let job = ctx.job();
    let result = ctx
        .services()
        .transfers
        .client(&job.tenant, &job.owner)
        .and_then(|client| client.cancel_transfer(transfer_id));
    match result {
        Ok(()) => info!(job = %job.uuid, %transfer_id, "transfer cancelled"),
        Err(e) => warn!(job = %job.uuid, %transfer_id, error = %e, "unable to cancel transfer"),
    }
}

/// Wait for `transfer_id` to complete.
///
/// `correlation_id` is the tag the transfer was created with. When
/// `post_event` is set a staging or archiving event is recorded on
/// completion.
pub fn monitor_transfer(
    ctx: &mut JobExecutionContext,
    transfer_id: &str,
    correlation_id: &str,
    kind: TransferKind,
    post_event: bool,
) -> Result<(), JobError> {
    let policy = ctx
        .config()
        .transfer_policy()
        .map_err(|e| invalid_policy("transfer", e))?;
    let mut backoff = policy.start();
    let mut last_error: Option<TransferClientError> = None;

    info!(job = %ctx.job().uuid, %transfer_id, %correlation_id, %kind, "monitoring transfer");

    loop {
        if let Err(e) = check_command(ctx) {
            if matches!(e, JobError::Cancelled) {
                cancel_transfer(ctx, transfer_id);
            }
            return Err(e);
        }

        match fetch(ctx, transfer_id) {
            Ok(task) => {
                backoff.record_success();
                last_error = None;
                debug!(job = %ctx.job().uuid, %transfer_id, status = task.status.as_str(), "transfer status");

                match task.status {
                    TransferStatus::Completed => {
                        if post_event {
                            let now = ctx.clock().utc_now();
                            let job = ctx.job().clone();
                            ctx.record_event(|events| match kind {
                                TransferKind::Inputs => events.record_staging_inputs_event(
                                    &job,
                                    task.status.as_str(),
                                    transfer_id,
                                    now,
                                ),
                                TransferKind::Archive => events.record_archiving_event(
                                    &job,
                                    task.status.as_str(),
                                    transfer_id,
                                    now,
                                ),
                            });
                        }
                        info!(job = %ctx.job().uuid, %transfer_id, %kind, "transfer completed");
                        return Ok(());
                    }
                    TransferStatus::Failed | TransferStatus::Cancelled => {
                        let message = format!(
                            "{} transfer {} ended with status {}: {}",
                            kind,
                            transfer_id,
                            task.status.as_str(),
                            task.error_message.as_deref().unwrap_or("no error reported")
                        );
                        ctx.set_condition(ConditionCode::JobTransferFailedOrCancelled, &message)?;
                        return Err(JobError::failed(
                            ConditionCode::JobTransferFailedOrCancelled,
                            message,
                        ));
                    }
                    _ => {}
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!(job = %ctx.job().uuid, %transfer_id, error = %e, "transfer status unavailable");
                backoff.record_failure_at(ctx.clock().now());
                last_error = Some(e);
            }
            Err(e) => {
                return Err(JobError::collaborator(
                    kind.failure_condition(),
                    format!("unable to read {} transfer {}", kind, transfer_id),
                    e,
                ));
            }
        }

        match backoff.next_delay_at(ctx.clock().now()) {
            Ok(delay) => ctx.clock().sleep(delay),
            Err(reason) => {
                let message = format!(
                    "gave up monitoring {} transfer {}: {}",
                    kind, transfer_id, reason
                );
                return Err(match (reason, last_error) {
                    (Exhausted::TooManyFailures, Some(e)) => JobError::collaborator(
                        ConditionCode::JobTransferMonitoringTimeout,
                        message,
                        e,
                    ),
                    _ => {
                        ctx.set_condition(ConditionCode::JobTransferMonitoringTimeout, &message)?;
                        JobError::failed(ConditionCode::JobTransferMonitoringTimeout, message)
                    }
                });
            }
        }
    }
}
