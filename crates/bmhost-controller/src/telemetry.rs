//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ControllerError;

/// Build the log filter; `RUST_LOG` takes precedence over the configured level
///
/// # Errors
/// Returns error if the configured level is not a valid filter directive
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ControllerError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| ControllerError::ConfigError(format!("invalid log level: {e}")))
}

/// Install the global tracing subscriber
///
/// # Errors
/// Returns error if the filter is invalid or a subscriber is already installed
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ControllerError> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config)?);

    let result = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| ControllerError::ConfigError(format!("failed to init tracing: {e}")))
}
