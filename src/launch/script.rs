//! Script rendering helpers
//!
//! Everything installed on the remote system is rendered here as text and
//! written verbatim; nothing is edited in place remotely.

use std::fmt::Write;

use crate::job::Job;

/// A rendered file and where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Path relative to the login directory, or absolute
    pub path: String,
    pub content: String,
    pub mode: u32,
}

impl StagedFile {
    pub fn new(path: String, content: String, mode: u32) -> Self {
        Self {
            path,
            content,
            mode,
        }
    }
}

/// Single-quote a value for POSIX shells
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell expression for a remote path; relative paths hang off `$HOME`
pub fn remote_path(path: &str) -> String {
    if path.starts_with('/') {
        shell_quote(path)
    } else {
        format!("\"$HOME\"/{}", shell_quote(path))
    }
}

/// `<exec dir>/<name>`
pub fn exec_file(job: &Job, name: &str) -> String {
    format!("{}/{}", job.exec_system_exec_dir.trim_end_matches('/'), name)
}

fn valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Variables every job sees, then the job's own, in name order
pub fn job_environment(job: &Job) -> Vec<(String, String)> {
    let mut env = vec![
        ("JOBFLOW_JOB_UUID".to_string(), job.uuid.to_string()),
        ("JOBFLOW_JOB_NAME".to_string(), job.name.clone()),
        ("JOBFLOW_JOB_OWNER".to_string(), job.owner.clone()),
        ("JOBFLOW_TENANT".to_string(), job.tenant.clone()),
        (
            "JOBFLOW_EXEC_DIR".to_string(),
            job.exec_system_exec_dir.clone(),
        ),
        (
            "JOBFLOW_INPUT_DIR".to_string(),
            job.exec_system_input_dir.clone(),
        ),
        (
            "JOBFLOW_OUTPUT_DIR".to_string(),
            job.exec_system_output_dir.clone(),
        ),
        (
            "JOBFLOW_MAX_MINUTES".to_string(),
            job.resources.max_minutes.to_string(),
        ),
    ];
    env.extend(
        job.env_variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    env
}

/// Render the env file: one `export NAME='value'` per variable.
///
/// Returns the names that were skipped because they are not valid shell
/// identifiers.
pub fn render_env_file(job: &Job) -> (String, Vec<String>) {
    let mut out = String::new();
    let mut skipped = Vec::new();
    for (name, value) in job_environment(job) {
        if valid_env_name(&name) {
            let _ = writeln!(out, "export {}={}", name, shell_quote(&value));
        } else {
            skipped.push(name);
        }
    }
    (out, skipped)
}

/// Variable names exported by the env file
pub fn env_names(job: &Job) -> Vec<String> {
    job_environment(job)
        .into_iter()
        .map(|(name, _)| name)
        .filter(|name| valid_env_name(name))
        .collect()
}

/// Application arguments, each quoted
pub fn quoted_args(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Common wrapper preamble: shebang, move to the exec dir, load the env file
pub fn wrapper_preamble(job: &Job, directives: &str) -> String {
    let mut out = String::from("#!/bin/bash\n");
    out.push_str(directives);
    let _ = writeln!(out, "# jobflow wrapper for job {}", job.uuid);
    let _ = writeln!(
        out,
        "cd {} || exit 1",
        remote_path(&job.exec_system_exec_dir)
    );
    let _ = writeln!(out, ". ./{}", super::ENV_FILE);
    out
}

/// Run `command` in the foreground and record its exit status
pub fn with_exit_code(command: &str) -> String {
    format!(
        "rm -f {exit}\n{command}\nstatus=$?\necho $status > {exit}\nexit $status\n",
        exit = super::EXIT_CODE_FILE,
        command = command
    )
}
