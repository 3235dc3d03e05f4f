//! Configuration
//!
//! Three layers, later wins:
//! 1. Built-in defaults
//! 2. TOML file (`-c FILE`)
//! 3. CLI overrides

mod defaults;
mod effective;
mod merge;
mod orchestrator;

pub use defaults::BuiltinDefaults;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};
pub use orchestrator::{
    LoggingConfig, MonitorConfig, OrchestratorConfig, PollingConfig, SshConfig, WorkerConfig,
};
