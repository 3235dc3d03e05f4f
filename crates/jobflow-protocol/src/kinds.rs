//! Job type, runtime and scheduler selectors.
//!
//! These three values key the launcher, monitor, stager and canceler
//! factories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParseError;

/// How the job is started on the execution host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Started directly as a background process or container
    Fork,
    /// Handed to a batch scheduler
    Batch,
}

/// Container or packaging runtime of the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeKind {
    Docker,
    Singularity,
    /// Archive unpacked and executed natively
    Zip,
}

/// How a Singularity image is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SingularityMode {
    /// `singularity instance start`, tracked by instance name
    #[default]
    Start,
    /// `singularity run` in the background, tracked by pid
    Run,
}

/// Batch scheduler on the execution system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerType {
    Slurm,
    Pbs,
    Lsf,
    Condor,
}

macro_rules! named_enum {
    ($ty:ty, $err:ident, { $($variant:path => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Stable upper-case name
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($name => Ok($variant),)+
                    _ => Err(ParseError::$err(s.to_string())),
                }
            }
        }
    };
}

named_enum!(JobType, JobType, {
    JobType::Fork => "FORK",
    JobType::Batch => "BATCH",
});

named_enum!(RuntimeKind, Runtime, {
    RuntimeKind::Docker => "DOCKER",
    RuntimeKind::Singularity => "SINGULARITY",
    RuntimeKind::Zip => "ZIP",
});

named_enum!(SchedulerType, Scheduler, {
    SchedulerType::Slurm => "SLURM",
    SchedulerType::Pbs => "PBS",
    SchedulerType::Lsf => "LSF",
    SchedulerType::Condor => "CONDOR",
});
