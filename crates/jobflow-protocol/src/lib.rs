//! Shared wire types for the jobflow orchestrator.
//!
//! Everything that crosses a boundary (job store rows, message-bus payloads,
//! remote status answers, transfer service answers) is described here so the
//! worker, the recovery subsystem and the collaborators agree on one spelling.

mod command;
mod condition;
mod error;
mod event;
mod kinds;
mod remote;
mod status;
mod transfer;

pub use command::AsyncCommand;
pub use condition::ConditionCode;
pub use error::ParseError;
pub use event::JobEventKind;
pub use kinds::{JobType, RuntimeKind, SchedulerType, SingularityMode};
pub use remote::{RemoteJobStatus, RemoteOutcome};
pub use status::JobStatus;
pub use transfer::{TransferElement, TransferRequest, TransferStatus, TransferTask};
