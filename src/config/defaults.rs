//! Built-in defaults (layer 1)

use serde_json::{json, Value};

use crate::job::DEFAULT_MAX_LAST_MESSAGE_LEN;

/// Built-in default configuration values
#[derive(Debug, Clone)]
pub struct BuiltinDefaults {
    /// Upper bound of the random pre-launch delay (default: 0, disabled)
    pub launch_throttle_max_ms: u64,

    /// Cap on a job's last message (default: 16384)
    pub max_last_message_len: usize,

    /// Failure-series ceiling shared by both monitors (default: 300)
    pub max_failure_seconds: u64,

    /// SSH connect timeout (default: 30)
    pub connect_timeout_seconds: u64,

    /// Log filter (default: "info")
    pub log_filter: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            launch_throttle_max_ms: 0,
            max_last_message_len: DEFAULT_MAX_LAST_MESSAGE_LEN,
            max_failure_seconds: 300,
            connect_timeout_seconds: 30,
            log_filter: "info".to_string(),
        }
    }
}

/// Polling schedule: 10×10s, 20×30s, 100×1min, then every 5min
fn polling_steps() -> Value {
    json!([
        {"max_tries": 10, "delay_ms": 10_000},
        {"max_tries": 20, "delay_ms": 30_000},
        {"max_tries": 100, "delay_ms": 60_000},
        {"max_tries": 0, "delay_ms": 300_000}
    ])
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> Value {
        json!({
            "worker": {
                "launch_throttle_max_ms": self.launch_throttle_max_ms,
                "max_last_message_len": self.max_last_message_len
            },
            "monitor": {
                "transfer": {
                    "steps": polling_steps(),
                    "max_failure_seconds": self.max_failure_seconds
                },
                "remote": {
                    "steps": polling_steps(),
                    "max_failure_seconds": self.max_failure_seconds
                }
            },
            "ssh": {
                "connect_timeout_seconds": self.connect_timeout_seconds,
                "server_alive_interval": 15,
                "server_alive_count_max": 2
            },
            "logging": {
                "filter": self.log_filter,
                "format": "compact"
            }
        })
    }
}
