//! Resolved system and application metadata.
//!
//! These mirror what the systems and apps services return. The worker only
//! reads them; they are resolved once per execution episode.

use serde::{Deserialize, Serialize};

use jobflow_protocol::{JobType, RuntimeKind, SchedulerType, SingularityMode};

/// A logical queue exposed by an execution system, mapped onto a real
/// scheduler partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalQueue {
    pub name: String,
    /// Partition name passed to the scheduler
    pub hpc_queue_name: String,
    /// Active jobs allowed on this queue across all users
    pub max_jobs: u32,
    /// Active jobs allowed on this queue per user
    pub max_jobs_per_user: u32,
    pub max_node_count: u32,
    pub max_cores_per_node: u32,
    pub max_memory_mb: u64,
    pub max_minutes: u32,
}

/// Execution or archive system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSystem {
    pub id: String,
    pub tenant: String,
    pub owner: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user for SSH sessions
    pub effective_user: String,
    /// Scheduler for batch jobs; `None` if the system only runs fork jobs
    #[serde(default)]
    pub scheduler: Option<SchedulerType>,
    #[serde(default)]
    pub batch_logical_queues: Vec<LogicalQueue>,
    #[serde(default)]
    pub batch_default_logical_queue: Option<String>,
    /// Extra `#SBATCH` directives appended to every batch wrapper
    #[serde(default)]
    pub scheduler_options: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    22
}

impl ExecSystem {
    /// Look up a logical queue, falling back to the system default
    pub fn logical_queue(&self, name: Option<&str>) -> Option<&LogicalQueue> {
        let wanted = name.or(self.batch_default_logical_queue.as_deref())?;
        self.batch_logical_queues.iter().find(|q| q.name == wanted)
    }
}

/// Application definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub version: String,
    pub owner: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub singularity_mode: SingularityMode,
    /// Default job type when the submission does not name one
    pub job_type: JobType,
    /// Container image reference, or the archive path for ZIP apps
    pub container_image: String,
    /// Executable inside an unpacked ZIP archive
    #[serde(default)]
    pub zip_entry_point: Option<String>,
    /// Extra runtime options, e.g. `--gpus all` for docker
    #[serde(default)]
    pub runtime_options: Vec<String>,
}

impl App {
    pub fn label(&self) -> String {
        format!("{}-{}", self.id, self.version)
    }
}
