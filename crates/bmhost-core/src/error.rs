//! Core error types for bmhost-core

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::secret::CredentialKind;
use crate::state::ProvisioningState;

/// Classification of a failure recorded against a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Host could not be registered (e.g. credentials unusable)
    RegistrationError,
    /// Rescue system could not be prepared
    PreparationError,
    /// Image installation or provisioning failed
    ProvisioningError,
    /// Requires manual intervention
    PermanentError,
    /// Host cannot be used anymore
    FatalError,
}

impl ErrorType {
    /// Whether retrying without intervention is pointless
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ErrorType::PermanentError | ErrorType::FatalError)
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorType::RegistrationError => "registration error",
            ErrorType::PreparationError => "preparation error",
            ErrorType::ProvisioningError => "provisioning error",
            ErrorType::PermanentError => "permanent error",
            ErrorType::FatalError => "fatal error",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by a reconciliation tick
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No handler is registered for the state the host is in
    #[error("no handler found for state \"{state}\"")]
    NoHandler {
        /// State read at the start of the tick
        state: ProvisioningState,
    },

    /// SSH secrets could not be fetched
    #[error("failed to get ssh keys and update status: {0}")]
    SecretFetch(String),

    /// Secret cannot be fingerprinted
    #[error("invalid {kind} ssh secret: {reason}")]
    InvalidSecret {
        /// Which credential
        kind: CredentialKind,
        /// What is wrong with it
        reason: String,
    },

    /// Stored fingerprint could not be updated
    #[error("failed to update status of {kind} SSH secret: {reason}")]
    SecretStatusUpdate {
        /// Which credential
        kind: CredentialKind,
        /// Underlying cause
        reason: String,
    },

    /// Failure recorded against the host by the reconciler
    #[error("{error_type}: {message}")]
    Recorded {
        /// Failure classification
        error_type: ErrorType,
        /// Human-readable message
        message: String,
    },

    /// Delegated action failed
    #[error("action failed: {0}")]
    Action(String),
}

impl CoreError {
    /// Check if the error will not go away by requeueing the host
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            CoreError::NoHandler { .. } => true,
            CoreError::Recorded { error_type, .. } => error_type.is_terminal(),
            _ => false,
        }
    }
}
