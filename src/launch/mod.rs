//! Stager, launcher and canceler family
//!
//! A job's (job type, runtime, scheduler) triple selects one [`Target`]. The
//! target in turn picks the stager that renders and installs the wrapper,
//! the launcher that submits it, the canceler, and the remote monitor (see
//! [`crate::monitor::remote::monitor_for`]). Unsupported triples fail with a
//! configuration error before anything touches the remote system.

mod canceler;
mod launcher;
mod script;
mod stager;

pub use canceler::{BackgroundCanceler, Canceler, DockerCanceler, InstanceCanceler, SlurmCanceler};
pub use launcher::{
    parse_container_id, parse_pid, parse_sbatch_job_id, BackgroundLauncher, DockerLauncher,
    InstanceLauncher, Launcher, SlurmLauncher,
};
pub use script::{exec_file, remote_path, render_env_file, shell_quote, StagedFile};
pub use stager::{BackgroundStager, DockerStager, InstanceStager, SlurmStager, Stager};

use std::fmt;

use jobflow_protocol::{JobType, RuntimeKind, SchedulerType, SingularityMode};

use crate::error::JobError;
use crate::resource::App;

/// Wrapper script installed in the exec dir
pub const WRAPPER_FILE: &str = "jobflow.sh";
/// Exported environment, sourced by the wrapper
pub const ENV_FILE: &str = "jobflow.env";
/// Exit status written by wrappers of background processes
pub const EXIT_CODE_FILE: &str = "jobflow.exitcode";
/// Combined output of the application
pub const OUTPUT_FILE: &str = "jobflow.out";

/// Concrete launch strategy for one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Detached docker container, tracked by container id
    Docker,
    /// `singularity instance start`, tracked by instance name
    SingularityInstance,
    /// `singularity run` in the background, tracked by pid
    SingularityRun,
    /// Unpacked archive in the background, tracked by pid
    Zip,
    /// Slurm batch job running the given runtime
    Slurm(RuntimeKind),
}

impl Target {
    /// Select the strategy for a (job type, runtime, scheduler) triple
    pub fn select(
        job_type: JobType,
        runtime: RuntimeKind,
        singularity_mode: SingularityMode,
        scheduler: Option<SchedulerType>,
    ) -> Result<Self, JobError> {
        match (job_type, runtime, scheduler) {
            (JobType::Fork, RuntimeKind::Docker, _) => Ok(Target::Docker),
            (JobType::Fork, RuntimeKind::Singularity, _) => Ok(match singularity_mode {
                SingularityMode::Start => Target::SingularityInstance,
                SingularityMode::Run => Target::SingularityRun,
            }),
            (JobType::Fork, RuntimeKind::Zip, _) => Ok(Target::Zip),
            (JobType::Batch, RuntimeKind::Docker, _) => Err(unsupported(
                "batch jobs cannot use the DOCKER runtime".to_string(),
            )),
            (JobType::Batch, _, None) => Err(unsupported(
                "batch job requested on a system without a scheduler".to_string(),
            )),
            (
                JobType::Batch,
                runtime @ (RuntimeKind::Singularity | RuntimeKind::Zip),
                Some(SchedulerType::Slurm),
            ) => Ok(Target::Slurm(runtime)),
            (
                JobType::Batch,
                runtime @ (RuntimeKind::Singularity | RuntimeKind::Zip),
                Some(scheduler @ (SchedulerType::Pbs | SchedulerType::Lsf | SchedulerType::Condor)),
            ) => Err(unsupported(format!(
                "{} runtime is not supported on {} schedulers",
                runtime, scheduler
            ))),
        }
    }

    /// Select the strategy for a job's app on a system
    pub fn for_app(
        job_type: JobType,
        app: &App,
        scheduler: Option<SchedulerType>,
    ) -> Result<Self, JobError> {
        Self::select(job_type, app.runtime, app.singularity_mode, scheduler)
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Target::Slurm(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Docker => f.write_str("docker"),
            Target::SingularityInstance => f.write_str("singularity-instance"),
            Target::SingularityRun => f.write_str("singularity-run"),
            Target::Zip => f.write_str("zip"),
            Target::Slurm(runtime) => write!(f, "slurm-{}", runtime.as_str().to_ascii_lowercase()),
        }
    }
}

fn unsupported(message: String) -> JobError {
    JobError::Configuration(message)
}

pub fn stager_for(target: Target) -> Box<dyn Stager> {
    match target {
        Target::Docker => Box::new(DockerStager),
        Target::SingularityInstance => Box::new(InstanceStager),
        Target::SingularityRun => Box::new(BackgroundStager::singularity()),
        Target::Zip => Box::new(BackgroundStager::zip()),
        Target::Slurm(runtime) => Box::new(SlurmStager::new(runtime)),
    }
}

pub fn launcher_for(target: Target) -> Box<dyn Launcher> {
    match target {
        Target::Docker => Box::new(DockerLauncher),
        Target::SingularityInstance => Box::new(InstanceLauncher),
        Target::SingularityRun | Target::Zip => Box::new(BackgroundLauncher),
        Target::Slurm(_) => Box::new(SlurmLauncher),
    }
}

pub fn canceler_for(target: Target) -> Box<dyn Canceler> {
    match target {
        Target::Docker => Box::new(DockerCanceler),
        Target::SingularityInstance => Box::new(InstanceCanceler),
        Target::SingularityRun | Target::Zip => Box::new(BackgroundCanceler),
        Target::Slurm(_) => Box::new(SlurmCanceler),
    }
}

/// Container or instance name for a job
pub fn instance_name(job_uuid: &uuid::Uuid) -> String {
    format!("jobflow-{}", job_uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(
        job_type: JobType,
        runtime: RuntimeKind,
        scheduler: Option<SchedulerType>,
    ) -> Result<Target, JobError> {
        Target::select(job_type, runtime, SingularityMode::Start, scheduler)
    }

    #[test]
    fn test_fork_ignores_scheduler() {
        assert_eq!(
            select(JobType::Fork, RuntimeKind::Docker, Some(SchedulerType::Pbs)).unwrap(),
            Target::Docker
        );
        assert_eq!(
            select(JobType::Fork, RuntimeKind::Zip, None).unwrap(),
            Target::Zip
        );
        assert_eq!(
            Target::select(
                JobType::Fork,
                RuntimeKind::Singularity,
                SingularityMode::Run,
                None
            )
            .unwrap(),
            Target::SingularityRun
        );
    }

    #[test]
    fn test_batch_on_slurm() {
        assert_eq!(
            select(JobType::Batch, RuntimeKind::Singularity, Some(SchedulerType::Slurm)).unwrap(),
            Target::Slurm(RuntimeKind::Singularity)
        );
        assert_eq!(
            select(JobType::Batch, RuntimeKind::Zip, Some(SchedulerType::Slurm)).unwrap(),
            Target::Slurm(RuntimeKind::Zip)
        );
    }

    #[test]
    fn test_unsupported_combinations() {
        for (runtime, scheduler) in [
            (RuntimeKind::Docker, Some(SchedulerType::Slurm)),
            (RuntimeKind::Singularity, None),
            (RuntimeKind::Singularity, Some(SchedulerType::Pbs)),
            (RuntimeKind::Zip, Some(SchedulerType::Condor)),
            (RuntimeKind::Zip, Some(SchedulerType::Lsf)),
        ] {
            match select(JobType::Batch, runtime, scheduler) {
                Err(JobError::Configuration(_)) => {}
                other => panic!("{:?}/{:?}: unexpected {:?}", runtime, scheduler, other),
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Target::Slurm(RuntimeKind::Zip).to_string(), "slurm-zip");
        assert_eq!(Target::SingularityInstance.to_string(), "singularity-instance");
    }
}
