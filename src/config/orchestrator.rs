//! Typed orchestrator configuration
//!
//! Deserialized from the merged layers and validated with bounded ranges.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use jobflow_recovery::{BackoffPolicy, BackoffStep, PolicyError};

use super::ConfigError;
use crate::job::DEFAULT_MAX_LAST_MESSAGE_LEN;

/// Worker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Random delay in `[0, max]` before each launch; 0 disables
    #[serde(default)]
    pub launch_throttle_max_ms: u64,

    #[serde(default = "default_max_last_message_len")]
    pub max_last_message_len: usize,
}

fn default_max_last_message_len() -> usize {
    DEFAULT_MAX_LAST_MESSAGE_LEN
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            launch_throttle_max_ms: 0,
            max_last_message_len: DEFAULT_MAX_LAST_MESSAGE_LEN,
        }
    }
}

/// One polling loop's schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    pub steps: Vec<BackoffStep>,
    #[serde(default = "default_max_failure_seconds")]
    pub max_failure_seconds: u64,
}

fn default_max_failure_seconds() -> u64 {
    300
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            steps: vec![
                BackoffStep::seconds(10, 10),
                BackoffStep::seconds(20, 30),
                BackoffStep::minutes(100, 1),
                BackoffStep::minutes(0, 5),
            ],
            max_failure_seconds: default_max_failure_seconds(),
        }
    }
}

impl PollingConfig {
    pub fn policy(&self) -> Result<BackoffPolicy, PolicyError> {
        BackoffPolicy::new(
            self.steps.clone(),
            Some(Duration::from_secs(self.max_failure_seconds)),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub transfer: PollingConfig,
    #[serde(default)]
    pub remote: PollingConfig,
}

/// SSH client options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_alive_interval")]
    pub server_alive_interval: u32,
    #[serde(default = "default_alive_count")]
    pub server_alive_count_max: u32,
    /// Overrides the system's port when set
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub key_path: Option<String>,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_alive_interval() -> u32 {
    15
}

fn default_alive_count() -> u32 {
    2
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            server_alive_interval: default_alive_interval(),
            server_alive_count_max: default_alive_count(),
            port: None,
            key_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "compact".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: default_format(),
        }
    }
}

/// Complete orchestrator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl OrchestratorConfig {
    /// Check bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        // launch_throttle_max_ms must be in [0, 600000]
        if self.worker.launch_throttle_max_ms > 600_000 {
            return Err(ConfigError::ValidationError(
                "worker.launch_throttle_max_ms must be in [0, 600000]".to_string(),
            ));
        }

        // max_last_message_len must be in [64, 1048576]
        if !(64..=1_048_576).contains(&self.worker.max_last_message_len) {
            return Err(ConfigError::ValidationError(
                "worker.max_last_message_len must be in [64, 1048576]".to_string(),
            ));
        }

        for (name, polling) in [
            ("transfer", &self.monitor.transfer),
            ("remote", &self.monitor.remote),
        ] {
            if polling.max_failure_seconds == 0 || polling.max_failure_seconds > 86_400 {
                return Err(ConfigError::ValidationError(format!(
                    "monitor.{}.max_failure_seconds must be in (0, 86400]",
                    name
                )));
            }
            polling.policy().map_err(|e| {
                ConfigError::ValidationError(format!("monitor.{}.steps: {}", name, e))
            })?;
        }

        // connect_timeout_seconds must be in (0, 300]
        if self.ssh.connect_timeout_seconds == 0 || self.ssh.connect_timeout_seconds > 300 {
            return Err(ConfigError::ValidationError(
                "ssh.connect_timeout_seconds must be in (0, 300]".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "compact" | "pretty" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be compact, pretty or json, got {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    pub fn transfer_policy(&self) -> Result<BackoffPolicy, PolicyError> {
        self.monitor.transfer.policy()
    }

    pub fn remote_policy(&self) -> Result<BackoffPolicy, PolicyError> {
        self.monitor.remote.policy()
    }
}
