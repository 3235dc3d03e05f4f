//! jobflow - job lifecycle orchestrator
//!
//! Drives jobs through input staging, remote submission, monitoring and
//! archiving on remote execution systems (docker, singularity, zip
//! archives, Slurm). Transient infrastructure failures park the job in
//! BLOCKED and hand it to the recovery scheduler instead of failing it.

pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod launch;
pub mod logging;
pub mod mock;
pub mod monitor;
pub mod ports;
pub mod recovery;
pub mod resource;
pub mod ssh;
pub mod worker;

pub use config::{EffectiveConfig, OrchestratorConfig};
pub use context::{Activity, JobExecutionContext, Services};
pub use error::{classify, JobError};
pub use job::{CommandRegistry, Job};
pub use launch::Target;
pub use recovery::{RecoveryReport, Recoverer};
pub use worker::{JobWorker, WorkerOutcome};
