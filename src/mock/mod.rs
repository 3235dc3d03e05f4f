//! In-memory collaborators
//!
//! Stand-ins for every port in [`crate::ports`], with failure injection for
//! exercising the recovery paths:
//!
//! - [`InMemoryJobStore`]: job records plus per-job status history
//! - [`ScriptedExecutor`] / [`MockExecutorFactory`]: remote commands answered
//!   from a script, installed files recorded
//! - [`MockTransferService`]: scripted transfer status sequences
//! - [`InMemoryBus`] / [`RecordingEventSink`]: queues and events
//! - [`StaticResolver`]: systems and apps
//! - [`ManualClock`]: time that only moves when slept

mod bus;
mod clock;
mod executor;
mod failure;
mod resolver;
mod store;
mod transfer;

pub use bus::{InMemoryBus, RecordingEventSink};
pub use clock::ManualClock;
pub use executor::{MockExecutorFactory, PutFile, Reply, ScriptedExecutor};
pub use failure::{FailureConfig, FailureInjector, InjectedFailure, MockOp};
pub use resolver::StaticResolver;
pub use store::InMemoryJobStore;
pub use transfer::{MockTransferClient, MockTransferService};
