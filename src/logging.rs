//! tracing subscriber setup
//!
//! `JOBFLOW_LOG` overrides the configured filter and `JOBFLOW_LOG_FORMAT`
//! (`compact`, `pretty`, `json`) overrides the configured format. Output goes
//! to stderr so CLI commands keep stdout for their results.

use std::env;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LoggingConfig;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }
}

/// Install the global subscriber; later calls are no-ops
pub fn init(config: &LoggingConfig, verbose: bool) {
    let filter = build_filter(config, verbose);
    let registry = Registry::default().with(filter);

    // try_init fails only if a subscriber is already installed
    let _ = match resolve_format(config) {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::NONE),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
}

fn build_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    match env::var("JOBFLOW_LOG") {
        Ok(value) if !value.trim().is_empty() => EnvFilter::new(value),
        _ if verbose => EnvFilter::new("debug"),
        _ => EnvFilter::new(&config.filter),
    }
}

fn resolve_format(config: &LoggingConfig) -> LogFormat {
    env::var("JOBFLOW_LOG_FORMAT")
        .ok()
        .as_deref()
        .and_then(LogFormat::parse)
        .or_else(|| LogFormat::parse(&config.format))
        .unwrap_or(LogFormat::Compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse(" JSON "), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }
}
