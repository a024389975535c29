//! Structured logging setup for binaries.
//!
//! The library only emits `tracing` events; a front end calls
//! [`init_logging`] once to install a subscriber. `RUST_LOG` wins over the
//! configured level when set.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Log line layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Timestamp, level, target and fields
    #[default]
    Full,
    /// One short line per event
    Compact,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Module filter directives, e.g. "sonic_boom_engine::propagation=trace"
    pub filter: Option<String>,
    /// Include thread names (useful with parallel ray workers)
    pub thread_names: bool,
}

impl LogConfig {
    /// Errors only
    pub fn quiet() -> Self {
        Self { level: LogLevel::Error, format: LogFormat::Compact, ..Default::default() }
    }

    /// Per-ray stage events
    pub fn verbose() -> Self {
        Self { level: LogLevel::Debug, thread_names: true, ..Default::default() }
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        match self.filter {
            Some(ref directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Install the global subscriber, writing to stderr.
/// Later calls are ignored.
pub fn init_logging(config: &LogConfig) {
    let filter = config.env_filter();
    let result = match config.format {
        LogFormat::Full => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_thread_names(config.thread_names),
            ),
        ),
        LogFormat::Compact => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_thread_names(config.thread_names),
            ),
        ),
    };
    // Already installed
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::default().to_string(), "warn");
    }

    #[test]
    fn test_presets() {
        assert_eq!(LogConfig::quiet().level, LogLevel::Error);
        let verbose = LogConfig::verbose();
        assert_eq!(verbose.level, LogLevel::Debug);
        assert!(verbose.thread_names);
    }

    #[test]
    fn test_second_init_is_harmless() {
        init_logging(&LogConfig::quiet());
        init_logging(&LogConfig::verbose());
        tracing::info!("still running");
    }
}
