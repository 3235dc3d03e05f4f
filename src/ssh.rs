//! SSH remote executor
//!
//! Runs commands through the system `ssh` client in batch mode. Exit status
//! 255 means ssh itself failed; its stderr is classified into connection,
//! timeout and authentication failures so the recovery classifier can
//! schedule the right retry policy.

use regex_lite::Regex;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use jobflow_recovery::{SshError, SshFailureKind};

use crate::config::SshConfig;
use crate::ports::{CommandOutput, ExecError, ExecutorFactory, RemoteExecutor};
use crate::resource::ExecSystem;

/// Exit status reserved by ssh for its own failures
const SSH_FAILURE_EXIT: i32 = 255;

/// Connection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
}

/// Executor bound to one host and login
pub struct SshExecutor {
    target: SshTarget,
    config: SshConfig,
}

impl SshExecutor {
    pub fn new(target: SshTarget, config: SshConfig) -> Self {
        Self { target, config }
    }

    /// ssh arguments up to and including the destination
    fn build_ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_seconds),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.config.server_alive_interval),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", self.config.server_alive_count_max),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.target.port.to_string(),
        ];

        if let Some(ref key_path) = self.config.key_path {
            args.push("-i".to_string());
            args.push(key_path.clone());
        }

        args.push(format!("{}@{}", self.target.user, self.target.host));
        args
    }

    fn run(&self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, ExecError> {
        let mut child = Command::new("ssh")
            .args(self.build_ssh_args())
            .arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::Io(format!("failed to spawn ssh: {}", e)))?;

        if let (Some(content), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(content)
                .map_err(|e| ExecError::Io(format!("failed to write to ssh: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ExecError::Io(format!("ssh process error: {}", e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if exit_code == SSH_FAILURE_EXIT {
            if let Some(kind) = classify_ssh_stderr(&stderr) {
                return Err(SshError::new(
                    kind,
                    &self.target.host,
                    self.target.port,
                    &self.target.user,
                    stderr.trim(),
                )
                .into());
            }
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&stderr);
        debug!(host = %self.target.host, exit_code, "remote command finished");

        Ok(CommandOutput {
            exit_code,
            output: combined,
        })
    }
}

impl RemoteExecutor for SshExecutor {
    fn execute(&self, command: &str) -> Result<CommandOutput, ExecError> {
        self.run(command, None)
    }

    fn put_file(&self, path: &str, content: &[u8], mode: u32) -> Result<(), ExecError> {
        let quoted = crate::launch::shell_quote(path);
        let command = format!(
            "mkdir -p \"$(dirname {q})\" && cat > {q} && chmod {mode:o} {q}",
            q = quoted,
            mode = mode
        );
        let out = self.run(&command, Some(content))?;
        if out.success() {
            Ok(())
        } else {
            Err(ExecError::Io(format!(
                "writing {} failed ({}): {}",
                path,
                out.exit_code,
                out.output.trim()
            )))
        }
    }
}

fn ssh_patterns() -> &'static [(Regex, SshFailureKind)] {
    static PATTERNS: OnceLock<Vec<(Regex, SshFailureKind)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                r"(?i)permission denied|authentication failed|too many authentication failures|host key verification failed",
                SshFailureKind::Authentication,
            ),
            (r"(?i)timed out|timeout", SshFailureKind::Timeout),
            (
                r"(?i)connection refused|connection reset|connection closed|could not resolve hostname|no route to host|network is unreachable|broken pipe",
                SshFailureKind::Connection,
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, kind)))
        .collect()
    })
}

/// Map ssh client stderr to a failure kind
pub fn classify_ssh_stderr(stderr: &str) -> Option<SshFailureKind> {
    ssh_patterns()
        .iter()
        .find(|(re, _)| re.is_match(stderr))
        .map(|(_, kind)| *kind)
}

/// Opens an [`SshExecutor`] per system
pub struct SshExecutorFactory {
    config: SshConfig,
}

impl SshExecutorFactory {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

impl ExecutorFactory for SshExecutorFactory {
    fn connect(&self, system: &ExecSystem) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        let target = SshTarget {
            host: system.host.clone(),
            port: self.config.port.unwrap_or(system.port),
            user: system.effective_user.clone(),
        };
        let executor = SshExecutor::new(target, self.config.clone());
        // Fail fast on a dead host
        executor.ping()?;
        Ok(Arc::new(executor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_stderr() {
        assert_eq!(
            classify_ssh_stderr("alice@login: Permission denied (publickey)."),
            Some(SshFailureKind::Authentication)
        );
        assert_eq!(
            classify_ssh_stderr("ssh: connect to host login port 22: Connection timed out"),
            Some(SshFailureKind::Timeout)
        );
        assert_eq!(
            classify_ssh_stderr("ssh: connect to host login port 22: Connection refused"),
            Some(SshFailureKind::Connection)
        );
        assert_eq!(
            classify_ssh_stderr("ssh: Could not resolve hostname nowhere: Name or service not known"),
            Some(SshFailureKind::Connection)
        );
        assert_eq!(classify_ssh_stderr("sbatch: error: invalid partition"), None);
    }

    #[test]
    fn test_ssh_args() {
        let executor = SshExecutor::new(
            SshTarget {
                host: "login.example.org".to_string(),
                port: 2222,
                user: "alice".to_string(),
            },
            SshConfig {
                key_path: Some("/keys/id".to_string()),
                ..SshConfig::default()
            },
        );
        let args = executor.build_ssh_args();
        assert!(args.contains(&"ConnectTimeout=30".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/id"]));
        assert_eq!(args.last().unwrap(), "alice@login.example.org");
    }
}
