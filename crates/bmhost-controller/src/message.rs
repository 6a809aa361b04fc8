//! Message types for actor communication
//!
//! Message handlers are implemented in their respective actor modules.

use std::time::Duration;

use bmhost_core::{ActionOutcome, HostRecord, InstallImage, ProvisioningState};
use chrono::{DateTime, Utc};
use kameo_macros::Reply;

use crate::error::ControllerError;

// ============================================================================
// HostActor Messages
// ============================================================================

/// Run one reconciliation tick
#[derive(Debug)]
pub struct Reconcile;

/// Outcome of one reconciliation tick
#[derive(Debug, Clone, Reply)]
pub struct TickReport {
    /// Host name
    pub host: String,
    /// State before the tick
    pub from: ProvisioningState,
    /// State after the tick
    pub to: ProvisioningState,
    /// What the tick reported
    pub outcome: ActionOutcome,
    /// When the host should be reconciled again, `None` if not until something changes
    pub requeue_after: Option<Duration>,
}

impl TickReport {
    /// Whether the tick moved the host to another state
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// Whether the deleting action has finished and the record can be removed
    #[must_use]
    pub fn deleted(&self) -> bool {
        self.from == ProvisioningState::Deleting && self.outcome.is_complete()
    }
}

/// Move a host from `None` into `Preparing`
#[derive(Debug)]
pub struct StartProvisioning;

/// Mark the host for deletion
#[derive(Debug)]
pub struct RequestDeletion;

/// Request (`Some`) or cancel (`None`) an image installation
#[derive(Debug)]
pub struct SetInstallImage {
    pub install_image: Option<InstallImage>,
}

/// Get full host status
#[derive(Debug)]
pub struct GetStatus;

/// Get a copy of the host record for persistence
#[derive(Debug)]
pub struct GetRecord;

/// Host status response
#[derive(Debug, Clone, Reply)]
pub struct HostStatus {
    /// Host name
    pub name: String,
    /// Current provisioning state
    pub state: ProvisioningState,
    /// Whether deletion has been requested
    pub deletion_requested: bool,
    /// Image requested for installation
    pub install_image: Option<String>,
    /// Outcome label of the last tick
    pub last_outcome: Option<String>,
    /// Error of the last tick, if it failed
    pub last_error: Option<String>,
    /// Failed ticks in a row
    pub consecutive_failures: u32,
    /// When the last tick ran
    pub last_reconciled: Option<DateTime<Utc>>,
}

// ============================================================================
// OrchestratorActor Messages
// ============================================================================

/// Register a host with the orchestrator
#[derive(Debug)]
pub struct RegisterHost {
    /// Record to start from
    pub record: HostRecord,
}

/// Unregister a host from the orchestrator
#[derive(Debug)]
pub struct UnregisterHost {
    /// Hostname to remove
    pub hostname: String,
}

/// Reconcile a specific host
#[derive(Debug)]
pub struct ReconcileHost {
    /// Hostname to reconcile
    pub hostname: String,
}

/// Reconcile every registered host
#[derive(Debug)]
pub struct ReconcileAll;

/// Result of reconciling all hosts
#[derive(Debug, Clone, Default, Reply)]
pub struct ReconcileSummary {
    /// Hosts reconciled
    pub total: usize,
    /// Hosts that changed state
    pub advanced: usize,
    /// Hosts waiting on an action
    pub waiting: usize,
    /// Hosts whose tick failed
    pub failed: usize,
    /// Hosts removed after deletion completed
    pub deleted: Vec<String>,
    /// Why each failed host failed
    pub errors: Vec<(String, ControllerError)>,
}

/// Get status of a specific host
#[derive(Debug)]
pub struct GetHostStatus {
    /// Hostname to query
    pub hostname: String,
}

/// List all managed hosts
#[derive(Debug)]
pub struct ListHosts;

/// Start provisioning a specific host
#[derive(Debug)]
pub struct StartHostProvisioning {
    pub hostname: String,
}

/// Mark a specific host for deletion
#[derive(Debug)]
pub struct RequestHostDeletion {
    pub hostname: String,
}

/// Request or cancel an image installation on a specific host
#[derive(Debug)]
pub struct SetHostInstallImage {
    pub hostname: String,
    pub install_image: Option<InstallImage>,
}
