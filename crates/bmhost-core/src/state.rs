//! Provisioning state types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle position of a bare-metal host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisioningState {
    /// Not yet provisioning; entry into `Preparing` is triggered externally
    #[default]
    None,
    Preparing,
    Registering,
    ImageInstalling,
    Provisioning,
    EnsureProvisioned,
    /// Steady state
    Provisioned,
    Deprovisioning,
    /// Terminal; the record is removed once this completes
    Deleting,
}

impl ProvisioningState {
    /// All states, in lifecycle order
    pub const ALL: [ProvisioningState; 9] = [
        ProvisioningState::None,
        ProvisioningState::Preparing,
        ProvisioningState::Registering,
        ProvisioningState::ImageInstalling,
        ProvisioningState::Provisioning,
        ProvisioningState::EnsureProvisioned,
        ProvisioningState::Provisioned,
        ProvisioningState::Deprovisioning,
        ProvisioningState::Deleting,
    ];

    /// States that have touched the machine and must be deprovisioned
    /// before the host can be deleted
    #[must_use]
    pub fn requires_deprovisioning(self) -> bool {
        matches!(
            self,
            ProvisioningState::Registering
                | ProvisioningState::ImageInstalling
                | ProvisioningState::Provisioning
                | ProvisioningState::EnsureProvisioned
                | ProvisioningState::Provisioned
        )
    }

    /// States whose handler moves the host forward and honours cancellation
    #[must_use]
    pub fn is_forward_progress(self) -> bool {
        self.successor().is_some()
    }

    /// State entered when the action of a forward-progress state completes
    #[must_use]
    pub fn successor(self) -> Option<ProvisioningState> {
        match self {
            ProvisioningState::Preparing => Some(ProvisioningState::Registering),
            ProvisioningState::Registering => Some(ProvisioningState::ImageInstalling),
            ProvisioningState::ImageInstalling => Some(ProvisioningState::Provisioning),
            ProvisioningState::Provisioning => Some(ProvisioningState::EnsureProvisioned),
            ProvisioningState::EnsureProvisioned => Some(ProvisioningState::Provisioned),
            ProvisioningState::None
            | ProvisioningState::Provisioned
            | ProvisioningState::Deprovisioning
            | ProvisioningState::Deleting => None,
        }
    }

    /// Wire name of the state
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisioningState::None => "none",
            ProvisioningState::Preparing => "preparing",
            ProvisioningState::Registering => "registering",
            ProvisioningState::ImageInstalling => "image-installing",
            ProvisioningState::Provisioning => "provisioning",
            ProvisioningState::EnsureProvisioned => "ensure-provisioned",
            ProvisioningState::Provisioned => "provisioned",
            ProvisioningState::Deprovisioning => "deprovisioning",
            ProvisioningState::Deleting => "deleting",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
