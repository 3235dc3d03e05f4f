//! Effective configuration with provenance
//!
//! Records the merged configuration together with the sources that
//! contributed to it, so a running worker can report exactly which file
//! (by digest) shaped its retry schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::orchestrator::OrchestratorConfig;

/// Schema identifier
pub const SCHEMA_ID: &str = "jobflow/effective_config@1";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing config source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged configuration plus provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_id: String,
    pub created_at: DateTime<Utc>,
    /// The merged configuration object
    pub config: Value,
    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
    /// Redacted key paths
    pub redactions: Vec<String>,
}

/// Keys whose values never appear in printed config
const SECRET_KEYS: &[&str] = &["password", "token", "secret", "credential", "passphrase"];

impl EffectiveConfig {
    /// Merge builtin defaults, an optional TOML file and CLI overrides
    pub fn build(
        config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = config_path {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);

        // Typed validation runs on the unredacted values
        let typed: OrchestratorConfig = serde_json::from_value(merged.clone())
            .map_err(|e| ConfigError::ParseError(format!("invalid config: {}", e)))?;
        typed.validate()?;

        let mut config = merged;
        let redactions = redact_secrets(&mut config);

        Ok(Self {
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config,
            sources,
            redactions,
        })
    }

    /// Typed view of the merged config
    pub fn orchestrator(&self) -> Result<OrchestratorConfig, ConfigError> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::ParseError(format!("invalid config: {}", e)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a config value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.config, |current, part| current.get(part))
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }
}

/// Read a TOML file, returning the value and the digest of its bytes
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path)
        .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::ParseError(format!("invalid UTF-8: {}", e)))?;
    let toml_value: toml::Value = toml::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

    Ok((toml_to_json(toml_value), digest))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

fn redact_secrets(value: &mut Value) -> Vec<String> {
    let mut redactions = Vec::new();
    redact_recursive(value, "", &mut redactions);
    redactions
}

fn redact_recursive(value: &mut Value, path: &str, redactions: &mut Vec<String>) {
    if let Value::Object(map) = value {
        for (key, val) in map.iter_mut() {
            let current = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };
            let key_lower = key.to_lowercase();
            let is_secret = SECRET_KEYS.iter().any(|s| key_lower.contains(s));

            if is_secret && !val.is_object() && !val.is_array() {
                *val = Value::String("[REDACTED]".to_string());
                redactions.push(current);
            } else {
                redact_recursive(val, &current, redactions);
            }
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_build_with_defaults_only() {
        let config = EffectiveConfig::build(None, None).unwrap();
        assert_eq!(config.get_u64("worker.max_last_message_len"), Some(16384));
        assert_eq!(config.get_str("logging.format"), Some("compact"));
        assert_eq!(config.sources.len(), 1);

        let typed = config.orchestrator().unwrap();
        assert_eq!(typed, OrchestratorConfig::default());
    }

    #[test]
    fn test_file_then_cli() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "[worker]").unwrap();
        writeln!(temp, "launch_throttle_max_ms = 2000").unwrap();
        writeln!(temp, "[[monitor.transfer.steps]]").unwrap();
        writeln!(temp, "max_tries = 3").unwrap();
        writeln!(temp, "delay_ms = 1000").unwrap();
        writeln!(temp, "[[monitor.transfer.steps]]").unwrap();
        writeln!(temp, "max_tries = 0").unwrap();
        writeln!(temp, "delay_ms = 5000").unwrap();

        let cli = serde_json::json!({"worker": {"launch_throttle_max_ms": 250}});
        let config = EffectiveConfig::build(Some(temp.path()), Some(cli)).unwrap();

        assert_eq!(config.get_u64("worker.launch_throttle_max_ms"), Some(250));
        let typed = config.orchestrator().unwrap();
        assert_eq!(typed.monitor.transfer.steps.len(), 2);
        // Remote schedule untouched by the file
        assert_eq!(typed.monitor.remote.steps.len(), 4);

        assert_eq!(config.sources[1].origin, ConfigOrigin::File);
        assert_eq!(config.sources[1].digest.as_ref().unwrap().len(), 64);
    }

    #[test]
    fn test_invalid_step_list_rejected() {
        let cli = serde_json::json!({"monitor": {"remote": {"steps": [
            {"max_tries": -1, "delay_ms": 10},
            {"max_tries": 3, "delay_ms": 10}
        ]}}});
        let err = EffectiveConfig::build(None, Some(cli)).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = EffectiveConfig::build(Some(Path::new("/nonexistent/jobflow.toml")), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_secret_redaction() {
        let cli = serde_json::json!({"ssh": {"key_passphrase": "hunter2"}});
        let config = EffectiveConfig::build(None, Some(cli)).unwrap();
        assert_eq!(config.get_str("ssh.key_passphrase"), Some("[REDACTED]"));
        assert_eq!(config.redactions, vec!["ssh.key_passphrase".to_string()]);
    }
}
