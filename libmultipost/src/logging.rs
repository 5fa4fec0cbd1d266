//! Logging setup shared by the library consumers and the `mpost` binary
//!
//! Adapters log every request line at `debug`, state transitions of the
//! orchestrator at `info` and swallowed retry errors at `warn`. The filter
//! defaults to `libmultipost` at the requested level and everything else at
//! `warn`, so third-party HTTP noise stays out of normal runs.
//!
//! ```no_run
//! use libmultipost::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "debug").init();
//! ```

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "MULTIPOST_LOG_FORMAT";
/// Environment variable selecting the minimum level
pub const LOG_LEVEL_ENV: &str = "MULTIPOST_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain text without colors
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line colored output for development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: impl Into<String>) -> Self {
        Self {
            format,
            level: level.into(),
        }
    }

    /// Build a configuration from `MULTIPOST_LOG_FORMAT` and `MULTIPOST_LOG_LEVEL`
    ///
    /// Unparseable formats fall back to text; a missing level falls back to `info`.
    pub fn from_env() -> Self {
        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);
        let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
        Self::new(format, level)
    }

    /// Directive string used when `RUST_LOG` is not set
    pub fn default_directives(&self) -> String {
        format!("warn,libmultipost={level},mpost={level}", level = self.level)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_directives()))
    }

    /// Install the global subscriber
    ///
    /// Returns an error message instead of panicking when a subscriber is
    /// already installed, which happens when several tests initialise logging.
    pub fn try_init(&self) -> Result<(), String> {
        let filter = self.filter();
        let result = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(false)
                .try_init(),
        };
        result.map_err(|e| e.to_string())
    }

    /// Install the global subscriber, ignoring an already-installed one
    pub fn init(&self) {
        if let Err(e) = self.try_init() {
            tracing::debug!("Logging already initialised: {}", e);
        }
    }
}

/// Initialize logging from the environment
pub fn init_default() {
    LoggingConfig::from_env().init();
}
