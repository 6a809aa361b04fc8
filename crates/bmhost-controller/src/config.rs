//! Controller configuration loading and types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// Top-level configuration for the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Reconciliation settings
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reconciliation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Delay before a host is reconciled again after a failed tick
    #[serde(default = "default_error_requeue_secs")]
    pub error_requeue_secs: u64,
    /// Number of hosts reconciled in parallel by `ReconcileAll`
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,
    /// Capacity of the host event broadcast channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            error_requeue_secs: default_error_requeue_secs(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl ReconcileConfig {
    #[must_use]
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}

fn default_error_requeue_secs() -> u64 {
    30
}

fn default_max_concurrent_reconciles() -> usize {
    4
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl ControllerConfig {
    /// Parse configuration from TOML
    ///
    /// # Errors
    /// Returns error if the TOML is malformed or a value is out of range
    pub fn parse(content: &str) -> Result<Self, ControllerError> {
        let config: ControllerConfig =
            toml::from_str(content).map_err(|e| ControllerError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ControllerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Load from default paths or use defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be loaded
    pub fn load_default() -> Result<Self, ControllerError> {
        if let Ok(path) = std::env::var("BMHOST_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let mut paths = vec![
            PathBuf::from("bmhost.toml"),
            PathBuf::from("/etc/bmhost/bmhost.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("bmhost/bmhost.toml"));
        }

        for path in paths {
            if path.exists() {
                return Self::load(&path);
            }
        }

        tracing::warn!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.reconcile.max_concurrent_reconciles == 0 {
            return Err(ControllerError::ConfigError(
                "reconcile.max_concurrent_reconciles must be at least 1".to_string(),
            ));
        }
        if self.reconcile.event_channel_capacity == 0 {
            return Err(ControllerError::ConfigError(
                "reconcile.event_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
