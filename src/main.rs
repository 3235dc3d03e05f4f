//! jobflow CLI
//!
//! Entry point for the `jobflow` command-line tool.

use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use jobflow::config::{ConfigOrigin, LoggingConfig, PollingConfig};
use jobflow::launch::stager_for;
use jobflow::resource::{App, ExecSystem};
use jobflow::{EffectiveConfig, Job, Target};
use jobflow_recovery::{BackoffStep, RecoverableError, RecoveryCategory};

#[derive(Parser)]
#[command(name = "jobflow")]
#[command(about = "Job lifecycle orchestrator", version)]
struct Cli {
    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config {
        /// TOML config file layered over the built-in defaults
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output in JSON format, with provenance
        #[arg(long)]
        json: bool,
    },

    /// Print the recovery schedule a failure category gets
    Policy {
        /// Category, e.g. SSH_CONNECTION or quota
        category: String,

        /// Activity in progress when the failure happened
        #[arg(long)]
        activity: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Render a job's wrapper and env files without touching any system
    Render {
        /// Job record (JSON)
        #[arg(long)]
        job: PathBuf,

        /// App definition (JSON)
        #[arg(long)]
        app: PathBuf,

        /// Execution system definition (JSON)
        #[arg(long)]
        system: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    jobflow::logging::init(&LoggingConfig::default(), cli.verbose);

    let result = match cli.command {
        Commands::Config { config, json } => run_config(config.as_deref(), json),
        Commands::Policy {
            category,
            activity,
            json,
        } => run_policy(&category, activity.as_deref(), json),
        Commands::Render { job, app, system } => run_render(&job, &app, &system),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_config(path: Option<&Path>, json: bool) -> Result<(), String> {
    let effective = EffectiveConfig::build(path, None).map_err(|e| e.to_string())?;

    if json {
        println!("{}", effective.to_json().map_err(|e| e.to_string())?);
        return Ok(());
    }

    let config = effective.orchestrator().map_err(|e| e.to_string())?;
    println!("Sources:");
    for source in &effective.sources {
        match (&source.origin, &source.path, &source.digest) {
            (ConfigOrigin::File, Some(path), Some(digest)) => {
                println!("  file {} (sha256 {})", path, digest)
            }
            (ConfigOrigin::Builtin, _, _) => println!("  builtin defaults"),
            (ConfigOrigin::Cli, _, _) => println!("  command line"),
            (ConfigOrigin::File, _, _) => println!("  file"),
        }
    }
    println!();
    println!(
        "worker.launch_throttle_max_ms = {}",
        config.worker.launch_throttle_max_ms
    );
    println!(
        "worker.max_last_message_len   = {}",
        config.worker.max_last_message_len
    );
    println!("monitor.transfer = {}", describe_polling(&config.monitor.transfer));
    println!("monitor.remote   = {}", describe_polling(&config.monitor.remote));
    println!(
        "ssh = connect timeout {}s, keepalive {}s x{}",
        config.ssh.connect_timeout_seconds,
        config.ssh.server_alive_interval,
        config.ssh.server_alive_count_max
    );
    println!(
        "logging = {} ({})",
        config.logging.filter, config.logging.format
    );
    if !effective.redactions.is_empty() {
        println!("redacted: {}", effective.redactions.join(", "));
    }
    Ok(())
}

fn describe_polling(polling: &PollingConfig) -> String {
    format!(
        "{}; failure ceiling {}s",
        describe_steps(&polling.steps),
        polling.max_failure_seconds
    )
}

fn describe_steps(steps: &[BackoffStep]) -> String {
    steps
        .iter()
        .map(|step| {
            let delay = humanize_ms(step.delay_ms);
            if step.is_unlimited() {
                format!("unlimited x {}", delay)
            } else {
                format!("{} x {}", step.max_tries, delay)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn humanize_ms(ms: u64) -> String {
    match ms {
        ms if ms % 3_600_000 == 0 && ms > 0 => format!("{}h", ms / 3_600_000),
        ms if ms % 60_000 == 0 && ms > 0 => format!("{}m", ms / 60_000),
        ms if ms % 1000 == 0 => format!("{}s", ms / 1000),
        ms => format!("{}ms", ms),
    }
}

fn run_policy(category: &str, activity: Option<&str>, json: bool) -> Result<(), String> {
    let category: RecoveryCategory = category.parse()?;
    let mut error = RecoverableError::new(category, "", BTreeMap::new());
    if let Some(activity) = activity {
        error.update_job_activity(activity);
    }
    let policy = error.backoff_policy();

    if json {
        let out = serde_json::json!({
            "category": category,
            "activity": activity,
            "policy": policy,
        });
        let text = serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    println!("{}", category);
    println!("  steps:   {}", describe_steps(policy.steps()));
    match policy.max_failure() {
        Some(ceiling) => println!("  ceiling: {}", humanize_ms(ceiling.as_millis() as u64)),
        None => println!("  ceiling: none"),
    }
    match policy.total_tries() {
        Some(total) => println!("  tries:   {}", total),
        None => println!("  tries:   unlimited"),
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))
}

fn run_render(job_path: &Path, app_path: &Path, system_path: &Path) -> Result<(), String> {
    let job: Job = read_json(job_path)?;
    let app: App = read_json(app_path)?;
    let system: ExecSystem = read_json(system_path)?;

    let job_type = job.effective_job_type(app.job_type);
    let target = Target::for_app(job_type, &app, system.scheduler).map_err(|e| e.to_string())?;
    let queue = if target.is_batch() {
        system.logical_queue(job.exec_system_logical_queue.as_deref())
    } else {
        None
    };

    let files = stager_for(target)
        .render(&job, &app, &system, queue)
        .map_err(|e| e.to_string())?;

    println!("# target: {}", target);
    for file in files {
        println!();
        println!("==> {} (mode {:o})", file.path, file.mode);
        print!("{}", file.content);
        if !file.content.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}
