//! Error types for bmhost-controller

use bmhost_core::{CoreError, ProvisioningState};
use thiserror::Error;

/// Errors that can occur in controller operations
#[derive(Error, Debug, Clone)]
pub enum ControllerError {
    /// Host not found in registry
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// Host already exists in registry
    #[error("host already exists: {0}")]
    HostAlreadyExists(String),

    /// Invalid state transition attempted
    #[error("invalid state transition for {host} from {from} to {to}")]
    InvalidTransition {
        /// Host name
        host: String,
        /// Current state
        from: ProvisioningState,
        /// Attempted target state
        to: ProvisioningState,
    },

    /// Provisioning requested without an image to install
    #[error("no install image set for host {0}")]
    MissingInstallImage(String),

    /// Host is being deleted
    #[error("deletion requested for host {0}")]
    DeletionRequested(String),

    /// Reconciler could not be created
    #[error("reconciler unavailable for host {host}: {reason}")]
    ReconcilerUnavailable {
        /// Host name
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// Error from the provisioning core
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}
