//! Structured logging for the distributed store.
//!
//! This module provides centralized logging configuration using the `tracing` crate.
//! Logs can be configured via the `SLICE_LOG` environment variable.
//!
//! # Environment Variables
//!
//! - `SLICE_LOG=info` - Default log level (info)
//! - `SLICE_LOG=debug` - Routing and fan-out details
//! - `SLICE_LOG=slice_storage::transaction=debug` - Module-specific logging
//! - `SLICE_LOG=warn,slice_storage::sharding=debug` - Combined filters
//!
//! # Example
//!
//! ```ignore
//! use slice_storage::logging;
//!
//! // Initialize logging (call once at startup)
//! logging::init();
//!
//! // Or from the loaded configuration
//! logging::init_from_config(&config.logging);
//! ```

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_ENV: &str = "SLICE_LOG";

/// Initializes the global tracing subscriber with default settings.
///
/// Uses the `SLICE_LOG` environment variable for configuration.
/// Default level is `info` if not specified.
///
/// Subsequent calls are ignored (tracing only allows one subscriber).
pub fn init() {
    init_with_default("info");
}

/// Initializes the global tracing subscriber with a custom default level.
///
/// # Arguments
/// * `default_level` - Default log level if `SLICE_LOG` is not set
pub fn init_with_default(default_level: &str) {
    let subscriber = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let _ = subscriber.try_init();
}

/// Initializes logging with JSON output format.
///
/// Useful for production environments where logs are processed by log aggregators.
pub fn init_json() {
    init_json_with_default("info");
}

fn init_json_with_default(default_level: &str) {
    let subscriber = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_thread_names(true)
        .json();

    let _ = subscriber.try_init();
}

/// Initializes logging from the `[logging]` configuration section.
///
/// `SLICE_LOG` still takes precedence over `level`.
pub fn init_from_config(config: &LoggingConfig) {
    if config.json {
        init_json_with_default(&config.level);
    } else {
        init_with_default(&config.level);
    }
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
}
