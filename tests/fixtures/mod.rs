//! Shared builders for the integration tests
//!
//! [`Harness`] wires every in-memory collaborator into one [`Services`] and
//! keeps typed handles to each so tests can script them and inspect what
//! happened.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use jobflow::config::OrchestratorConfig;
use jobflow::job::{CommandRegistry, FileInput, Job};
use jobflow::mock::{
    InMemoryBus, InMemoryJobStore, ManualClock, MockExecutorFactory, MockTransferService,
    RecordingEventSink, ScriptedExecutor, StaticResolver,
};
use jobflow::ports::{MessageBus, Queue};
use jobflow::resource::{App, ExecSystem, LogicalQueue};
use jobflow::{JobWorker, Recoverer, Services};
use jobflow_protocol::{JobType, RuntimeKind, SchedulerType, SingularityMode};
use uuid::Uuid;

pub const TENANT: &str = "dev";
pub const OWNER: &str = "alice";

pub struct Harness {
    pub services: Arc<Services>,
    pub store: Arc<InMemoryJobStore>,
    pub executor: Arc<ScriptedExecutor>,
    pub executors: Arc<MockExecutorFactory>,
    pub transfers: Arc<MockTransferService>,
    pub events: Arc<RecordingEventSink>,
    pub bus: Arc<InMemoryBus>,
    pub resolver: Arc<StaticResolver>,
    pub clock: Arc<ManualClock>,
    pub commands: Arc<CommandRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let executor = Arc::new(ScriptedExecutor::new("login.hpc.example.org", 22, OWNER));
        let executors = Arc::new(MockExecutorFactory::new(executor.clone()));
        let transfers = MockTransferService::new();
        let events = Arc::new(RecordingEventSink::new());
        let bus = Arc::new(InMemoryBus::new());
        let resolver = Arc::new(StaticResolver::new());
        let clock = Arc::new(ManualClock::new());
        let commands = Arc::new(CommandRegistry::new());

        resolver.add_system(slurm_system());
        resolver.add_system(docker_host());
        resolver.add_system(archive_system());
        resolver.add_app(TENANT, singularity_app());
        resolver.add_app(TENANT, docker_app());

        let services = Arc::new(Services {
            store: store.clone(),
            executors: executors.clone(),
            transfers: Arc::new(transfers.clone()),
            events: events.clone(),
            bus: bus.clone(),
            resolver: resolver.clone(),
            clock: clock.clone(),
            commands: commands.clone(),
            config,
        });

        Self {
            services,
            store,
            executor,
            executors,
            transfers,
            events,
            bus,
            resolver,
            clock,
            commands,
        }
    }

    pub fn worker(&self) -> JobWorker {
        JobWorker::new(self.services.clone())
    }

    pub fn recoverer(&self) -> Recoverer {
        Recoverer::new(self.services.clone())
    }

    /// Store the job and put it on the job queue
    pub fn submit(&self, job: Job) -> Uuid {
        let uuid = job.uuid;
        self.store.insert(job);
        self.bus
            .publish(Queue::Job, &uuid.to_string())
            .expect("publish job");
        uuid
    }

    pub fn job(&self, uuid: Uuid) -> Job {
        self.store.get(uuid).expect("job in store")
    }
}

pub fn normal_queue() -> LogicalQueue {
    LogicalQueue {
        name: "normal".to_string(),
        hpc_queue_name: "normal".to_string(),
        max_jobs: 50,
        max_jobs_per_user: 10,
        max_node_count: 16,
        max_cores_per_node: 56,
        max_memory_mb: 192_000,
        max_minutes: 2880,
    }
}

/// Slurm cluster login node
pub fn slurm_system() -> ExecSystem {
    ExecSystem {
        id: "frontera".to_string(),
        tenant: TENANT.to_string(),
        owner: "admin".to_string(),
        enabled: true,
        host: "login.hpc.example.org".to_string(),
        port: 22,
        effective_user: OWNER.to_string(),
        scheduler: Some(SchedulerType::Slurm),
        batch_logical_queues: vec![normal_queue()],
        batch_default_logical_queue: Some("normal".to_string()),
        scheduler_options: vec!["--account=sim-alloc".to_string()],
    }
}

/// Plain host running docker, no scheduler
pub fn docker_host() -> ExecSystem {
    ExecSystem {
        id: "vm-1".to_string(),
        tenant: TENANT.to_string(),
        owner: "admin".to_string(),
        enabled: true,
        host: "vm-1.example.org".to_string(),
        port: 22,
        effective_user: OWNER.to_string(),
        scheduler: None,
        batch_logical_queues: vec![],
        batch_default_logical_queue: None,
        scheduler_options: vec![],
    }
}

pub fn archive_system() -> ExecSystem {
    ExecSystem {
        id: "corral".to_string(),
        scheduler: None,
        batch_logical_queues: vec![],
        batch_default_logical_queue: None,
        scheduler_options: vec![],
        host: "data.example.org".to_string(),
        ..slurm_system()
    }
}

/// Batch singularity app, `singularity run` mode
pub fn singularity_app() -> App {
    App {
        id: "sim".to_string(),
        version: "1.0".to_string(),
        owner: OWNER.to_string(),
        enabled: true,
        runtime: RuntimeKind::Singularity,
        singularity_mode: SingularityMode::Run,
        job_type: JobType::Batch,
        container_image: "docker://example/sim:1.0".to_string(),
        zip_entry_point: None,
        runtime_options: vec![],
    }
}

/// Fork docker app
pub fn docker_app() -> App {
    App {
        id: "img-proc".to_string(),
        version: "2.1".to_string(),
        owner: OWNER.to_string(),
        enabled: true,
        runtime: RuntimeKind::Docker,
        singularity_mode: SingularityMode::Run,
        job_type: JobType::Fork,
        container_image: "example/img-proc:2.1".to_string(),
        zip_entry_point: None,
        runtime_options: vec![],
    }
}

/// Batch job for the singularity app on the Slurm cluster
pub fn batch_job() -> Job {
    let mut job = Job::new(TENANT, OWNER, "sim", "1.0", "frontera", Utc::now());
    job.exec_system_logical_queue = Some("normal".to_string());
    job.app_args = vec!["--steps".to_string(), "1000".to_string()];
    job
}

/// Fork job for the docker app
pub fn docker_job() -> Job {
    Job::new(TENANT, OWNER, "img-proc", "2.1", "vm-1", Utc::now())
}

pub fn file_input(name: &str) -> FileInput {
    FileInput {
        source_url: format!("https://data.example.org/inputs/{}", name),
        target_path: name.to_string(),
    }
}
