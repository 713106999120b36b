//! Structured logging utilities for fl-cow components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use flcow_config::{log_engine_debug, log_layer_warn};
//!
//! log_layer_warn!(path = %p.display(), error = %e, "copy-on-write failed");
//! log_engine_debug!(size = 42u64, "temporary written");
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::LOG_ENV;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const LAYER: &'static str = "LAYER";
    pub const ENGINE: &'static str = "ENGINE";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

// === LAYER logging macros ===

#[macro_export]
macro_rules! log_layer_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = "LAYER", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_layer_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = "LAYER", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_layer_trace {
    ($($arg:tt)+) => {
        tracing::trace!(component = "LAYER", $($arg)+)
    };
}

// === ENGINE logging macros ===

#[macro_export]
macro_rules! log_engine_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = "ENGINE", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_engine_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = "ENGINE", $($arg)+)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($($arg:tt)+) => {
        tracing::info!(component = "CLI", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = "CLI", $($arg)+)
    };
}

/// Initialize logging to stderr with the given default level.
///
/// `FLCOW_LOG` takes precedence when set. Returns false if a global
/// subscriber was already installed.
pub fn init_logging(level: LogLevel) -> bool {
    use std::io::IsTerminal;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
