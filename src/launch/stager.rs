//! Stagers
//!
//! A stager renders the wrapper script and env file for one target and
//! installs them in the job's exec dir.

use std::fmt::Write;
use tracing::{debug, warn};

use jobflow_protocol::{ConditionCode, RuntimeKind};

use super::script::{
    env_names, exec_file, quoted_args, remote_path, render_env_file, shell_quote,
    with_exit_code, wrapper_preamble, StagedFile,
};
use super::{instance_name, ENV_FILE, OUTPUT_FILE, WRAPPER_FILE};
use crate::context::JobExecutionContext;
use crate::error::JobError;
use crate::job::Job;
use crate::resource::{App, ExecSystem, LogicalQueue};

/// Mount point of the job's input dir inside containers
const CONTAINER_INPUT_DIR: &str = "/jobflow/input";
/// Mount point of the job's output dir inside containers
const CONTAINER_OUTPUT_DIR: &str = "/jobflow/output";

pub trait Stager: Send + Sync {
    /// Command line the wrapper runs, after the preamble
    fn render_body(&self, job: &Job, app: &App) -> Result<String, JobError>;

    /// Lines placed right after the shebang
    fn render_directives(
        &self,
        _job: &Job,
        _system: &ExecSystem,
        _queue: Option<&LogicalQueue>,
    ) -> Result<String, JobError> {
        Ok(String::new())
    }

    /// Render every file the job needs
    fn render(
        &self,
        job: &Job,
        app: &App,
        system: &ExecSystem,
        queue: Option<&LogicalQueue>,
    ) -> Result<Vec<StagedFile>, JobError> {
        let (env, skipped) = render_env_file(job);
        if !skipped.is_empty() {
            warn!(job = %job.uuid, ?skipped, "skipping invalid environment variable names");
        }

        let mut wrapper = wrapper_preamble(job, &self.render_directives(job, system, queue)?);
        wrapper.push_str(&self.render_body(job, app)?);

        Ok(vec![
            StagedFile::new(exec_file(job, ENV_FILE), env, 0o600),
            StagedFile::new(exec_file(job, WRAPPER_FILE), wrapper, 0o700),
        ])
    }

    /// Render locally and install on the execution system
    fn stage_job(&self, ctx: &mut JobExecutionContext) -> Result<(), JobError> {
        let app = ctx.app()?.clone();
        let system = ctx.exec_system()?.clone();
        let queue = ctx.logical_queue()?;
        let files = self.render(ctx.job(), &app, &system, queue.as_ref())?;

        let files_manager = ctx.file_manager()?;
        for file in &files {
            files_manager.install(&file.path, &file.content, file.mode)?;
            debug!(job = %ctx.job().uuid, path = %file.path, "installed");
        }
        Ok(())
    }
}

fn runtime_options(app: &App) -> String {
    app.runtime_options
        .iter()
        .map(|o| format!("{} ", o))
        .collect()
}

/// `singularity run` command line
fn singularity_run(job: &Job, app: &App) -> String {
    format!(
        "singularity run {}--bind {}:{} --bind {}:{} {} {}",
        runtime_options(app),
        remote_path(&job.exec_system_input_dir),
        CONTAINER_INPUT_DIR,
        remote_path(&job.exec_system_output_dir),
        CONTAINER_OUTPUT_DIR,
        shell_quote(&app.container_image),
        quoted_args(&job.app_args)
    )
    .trim_end()
    .to_string()
}

/// Unpack the archive into `app/` and run its entry point
fn zip_run(job: &Job, app: &App) -> Result<String, JobError> {
    let entry = app
        .zip_entry_point
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| {
            JobError::Configuration(format!("zip app {} has no entry point", app.label()))
        })?;
    if entry.starts_with('/') || entry.split('/').any(|part| part == "..") {
        return Err(JobError::Configuration(format!(
            "zip entry point {} must stay inside the archive",
            entry
        )));
    }

    Ok(format!(
        "unzip -o -q {} -d app || {{ echo 1 > {}; exit 1; }}\n{}",
        remote_path(&app.container_image),
        super::EXIT_CODE_FILE,
        with_exit_code(
            format!("./app/{} {}", shell_quote(entry), quoted_args(&job.app_args)).trim_end()
        )
    ))
}

/// Detached docker container
#[derive(Debug, Clone, Copy)]
pub struct DockerStager;

impl Stager for DockerStager {
    fn render_body(&self, job: &Job, app: &App) -> Result<String, JobError> {
        let mut cmd = format!("docker run -d --name {}", instance_name(&job.uuid));
        let _ = write!(
            cmd,
            " -v {}:{} -v {}:{}",
            remote_path(&job.exec_system_input_dir),
            CONTAINER_INPUT_DIR,
            remote_path(&job.exec_system_output_dir),
            CONTAINER_OUTPUT_DIR
        );
        for name in env_names(job) {
            let _ = write!(cmd, " -e {}", name);
        }
        for option in &app.runtime_options {
            let _ = write!(cmd, " {}", option);
        }
        let _ = write!(cmd, " {}", shell_quote(&app.container_image));
        if !job.app_args.is_empty() {
            let _ = write!(cmd, " {}", quoted_args(&job.app_args));
        }
        cmd.push('\n');
        Ok(cmd)
    }
}

/// `singularity instance start`
#[derive(Debug, Clone, Copy)]
pub struct InstanceStager;

impl Stager for InstanceStager {
    fn render_body(&self, job: &Job, app: &App) -> Result<String, JobError> {
        let cmd = format!(
            "singularity instance start {}--bind {}:{} --bind {}:{} {} {} {}",
            runtime_options(app),
            remote_path(&job.exec_system_input_dir),
            CONTAINER_INPUT_DIR,
            remote_path(&job.exec_system_output_dir),
            CONTAINER_OUTPUT_DIR,
            shell_quote(&app.container_image),
            instance_name(&job.uuid),
            quoted_args(&job.app_args)
        );
        Ok(format!("{}\n", cmd.trim_end()))
    }
}

/// Foreground wrapper that the launcher runs in the background
#[derive(Debug, Clone, Copy)]
pub struct BackgroundStager {
    runtime: RuntimeKind,
}

impl BackgroundStager {
    pub fn singularity() -> Self {
        Self {
            runtime: RuntimeKind::Singularity,
        }
    }

    pub fn zip() -> Self {
        Self {
            runtime: RuntimeKind::Zip,
        }
    }
}

impl Stager for BackgroundStager {
    fn render_body(&self, job: &Job, app: &App) -> Result<String, JobError> {
        match self.runtime {
            RuntimeKind::Zip => zip_run(job, app),
            _ => Ok(with_exit_code(&singularity_run(job, app))),
        }
    }
}

/// Slurm batch script running Singularity or a Zip archive
#[derive(Debug, Clone, Copy)]
pub struct SlurmStager {
    runtime: RuntimeKind,
}

impl SlurmStager {
    pub fn new(runtime: RuntimeKind) -> Self {
        Self { runtime }
    }
}

/// Slurm `--time` value for a minute count
fn slurm_time(minutes: u32) -> String {
    format!("{:02}:{:02}:00", minutes / 60, minutes % 60)
}

impl Stager for SlurmStager {
    fn render_directives(
        &self,
        job: &Job,
        system: &ExecSystem,
        queue: Option<&LogicalQueue>,
    ) -> Result<String, JobError> {
        let queue = queue.ok_or_else(|| {
            JobError::Configuration(format!(
                "batch job on {} needs a logical queue",
                system.id
            ))
        })?;
        let r = &job.resources;

        let mut out = String::new();
        let _ = writeln!(out, "#SBATCH --job-name={}", instance_name(&job.uuid));
        let _ = writeln!(out, "#SBATCH --partition={}", queue.hpc_queue_name);
        let _ = writeln!(out, "#SBATCH --nodes={}", r.node_count);
        let _ = writeln!(out, "#SBATCH --ntasks-per-node={}", r.cores_per_node);
        let _ = writeln!(out, "#SBATCH --mem={}M", r.memory_mb);
        let _ = writeln!(out, "#SBATCH --time={}", slurm_time(r.max_minutes));
        let _ = writeln!(out, "#SBATCH --output={}", OUTPUT_FILE);
        for option in &system.scheduler_options {
            let _ = writeln!(out, "#SBATCH {}", option.trim());
        }
        Ok(out)
    }

    fn render_body(&self, job: &Job, app: &App) -> Result<String, JobError> {
        match self.runtime {
            RuntimeKind::Singularity => Ok(with_exit_code(&singularity_run(job, app))),
            RuntimeKind::Zip => zip_run(job, app),
            RuntimeKind::Docker => Err(JobError::failed(
                ConditionCode::JobInvalidDefinition,
                "docker cannot run under slurm",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobflow_protocol::{JobType, SchedulerType, SingularityMode};

    fn job() -> Job {
        let mut job = Job::new("dev", "alice", "sim", "1.0", "frontera", Utc::now());
        job.app_args = vec!["--steps".to_string(), "10".to_string()];
        job.env_variables
            .insert("MODE".to_string(), "fast".to_string());
        job
    }

    fn app(runtime: RuntimeKind) -> App {
        App {
            id: "sim".to_string(),
            version: "1.0".to_string(),
            owner: "alice".to_string(),
            enabled: true,
            runtime,
            singularity_mode: SingularityMode::Run,
            job_type: JobType::Fork,
            container_image: "docker://example/sim:1.0".to_string(),
            zip_entry_point: Some("bin/run.sh".to_string()),
            runtime_options: vec![],
        }
    }

    fn system() -> ExecSystem {
        ExecSystem {
            id: "frontera".to_string(),
            tenant: "dev".to_string(),
            owner: "admin".to_string(),
            enabled: true,
            host: "login".to_string(),
            port: 22,
            effective_user: "alice".to_string(),
            scheduler: Some(SchedulerType::Slurm),
            batch_logical_queues: vec![],
            batch_default_logical_queue: None,
            scheduler_options: vec!["--account=TG-123".to_string()],
        }
    }

    fn queue() -> LogicalQueue {
        LogicalQueue {
            name: "normal".to_string(),
            hpc_queue_name: "normal-hpc".to_string(),
            max_jobs: 10,
            max_jobs_per_user: 5,
            max_node_count: 8,
            max_cores_per_node: 56,
            max_memory_mb: 192_000,
            max_minutes: 2880,
        }
    }

    #[test]
    fn test_docker_wrapper() {
        let j = job();
        let files = DockerStager
            .render(&j, &app(RuntimeKind::Docker), &system(), None)
            .unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, format!("jobs/{}/jobflow.env", j.uuid));
        assert_eq!(files[0].mode, 0o600);
        assert!(files[0].content.contains("export MODE='fast'"));

        let wrapper = &files[1];
        assert_eq!(wrapper.mode, 0o700);
        assert!(wrapper
            .content
            .contains(&format!("docker run -d --name jobflow-{}", j.uuid)));
        assert!(wrapper.content.contains(" -e MODE "));
        assert!(wrapper
            .content
            .contains("'docker://example/sim:1.0' '--steps' '10'\n"));
    }

    #[test]
    fn test_singularity_run_records_exit_code() {
        let j = job();
        let body = BackgroundStager::singularity()
            .render_body(&j, &app(RuntimeKind::Singularity))
            .unwrap();
        assert!(body.starts_with("rm -f jobflow.exitcode\nsingularity run --bind "));
        assert!(body.contains("echo $status > jobflow.exitcode"));
    }

    #[test]
    fn test_zip_requires_entry_point() {
        let mut a = app(RuntimeKind::Zip);
        a.zip_entry_point = None;
        assert!(matches!(
            BackgroundStager::zip().render_body(&job(), &a),
            Err(JobError::Configuration(_))
        ));

        a.zip_entry_point = Some("../../bin/sh".to_string());
        assert!(BackgroundStager::zip().render_body(&job(), &a).is_err());
    }

    #[test]
    fn test_zip_body() {
        let body = BackgroundStager::zip()
            .render_body(&job(), &app(RuntimeKind::Zip))
            .unwrap();
        assert!(body.starts_with("unzip -o -q "));
        assert!(body.contains("./app/'bin/run.sh' '--steps' '10'\n"));
    }

    #[test]
    fn test_slurm_directives() {
        let mut j = job();
        j.resources.node_count = 2;
        j.resources.cores_per_node = 48;
        j.resources.memory_mb = 4096;
        j.resources.max_minutes = 90;
        let q = queue();

        let files = SlurmStager::new(RuntimeKind::Singularity)
            .render(&j, &app(RuntimeKind::Singularity), &system(), Some(&q))
            .unwrap();
        let wrapper = &files[1].content;
        assert!(wrapper.starts_with("#!/bin/bash\n#SBATCH --job-name=jobflow-"));
        assert!(wrapper.contains("#SBATCH --partition=normal-hpc\n"));
        assert!(wrapper.contains("#SBATCH --nodes=2\n"));
        assert!(wrapper.contains("#SBATCH --ntasks-per-node=48\n"));
        assert!(wrapper.contains("#SBATCH --mem=4096M\n"));
        assert!(wrapper.contains("#SBATCH --time=01:30:00\n"));
        assert!(wrapper.contains("#SBATCH --account=TG-123\n"));
        assert!(wrapper.contains("singularity run "));
    }

    #[test]
    fn test_slurm_needs_queue() {
        let err = SlurmStager::new(RuntimeKind::Zip)
            .render(&job(), &app(RuntimeKind::Zip), &system(), None)
            .unwrap_err();
        assert!(matches!(err, JobError::Configuration(_)));
    }
}
