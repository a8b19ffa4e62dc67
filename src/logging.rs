//! Logging setup driven by environment variables.
//!
//! `LOG_LEVEL` selects the verbosity (debug, info, warn, error; default
//! info) and `LOG_FORMAT` the output shape (text or json; default text).
//! Logs always go to stderr: stdout carries the MCP protocol.

use tracing_subscriber::EnvFilter;

/// Parsed logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_filter(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
        }
    }
}

/// Read `LOG_LEVEL` and `LOG_FORMAT`, falling back to the defaults for
/// unset or unrecognized values.
pub fn config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = std::env::var("LOG_LEVEL") {
        match level.to_lowercase().as_str() {
            "debug" => config.level = Level::Debug,
            "info" => config.level = Level::Info,
            "warn" | "warning" => config.level = Level::Warn,
            "error" => config.level = Level::Error,
            _ => {}
        }
    }

    if let Ok(format) = std::env::var("LOG_FORMAT") {
        match format.to_lowercase().as_str() {
            "json" => config.format = Format::Json,
            "text" => config.format = Format::Text,
            _ => {}
        }
    }

    config
}

/// Install the global subscriber from the environment configuration.
pub fn init_from_env() {
    init(config_from_env());
}

/// Install the global subscriber.
pub fn init(config: LoggingConfig) {
    let filter = EnvFilter::new(config.level.as_filter());

    match config.format {
        Format::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        Format::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}
