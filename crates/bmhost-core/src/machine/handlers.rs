//! Per-state handlers

use tracing::{error, info};

use crate::error::CoreError;
use crate::outcome::ActionOutcome;
use crate::state::ProvisioningState;

use super::HostStateMachine;

impl HostStateMachine<'_> {
    /// Run the action of `state` and move on if it completed
    pub(super) async fn dispatch(&mut self, state: ProvisioningState) -> ActionOutcome {
        let cancellable = state.is_forward_progress() || state == ProvisioningState::Provisioned;
        if cancellable && self.cancel_provisioning() {
            return ActionOutcome::Complete;
        }

        let host = &*self.host;
        let outcome = match state {
            ProvisioningState::Preparing => self.reconciler.action_preparing(host).await,
            ProvisioningState::Registering => self.reconciler.action_registering(host).await,
            ProvisioningState::ImageInstalling => {
                self.reconciler.action_image_installing(host).await
            }
            ProvisioningState::Provisioning => self.reconciler.action_provisioning(host).await,
            ProvisioningState::EnsureProvisioned => {
                self.reconciler.action_ensure_provisioned(host).await
            }
            ProvisioningState::Provisioned => self.reconciler.action_provisioned(host).await,
            ProvisioningState::Deprovisioning => {
                self.reconciler.action_deprovisioning(host).await
            }
            ProvisioningState::Deleting => self.reconciler.action_deleting(host).await,
            ProvisioningState::None => {
                error!(host = %host.name, %state, "no handler found for state");
                return ActionOutcome::Failed(CoreError::NoHandler { state });
            }
        };

        if outcome.is_complete()
            && let Some(next) = completion_target(state)
        {
            self.next_state = next;
        }
        outcome
    }

    /// Pivot to teardown if the install request was withdrawn
    fn cancel_provisioning(&mut self) -> bool {
        if !self.host.provisioning_cancelled() {
            return false;
        }

        info!(
            host = %self.host.name,
            state = %self.next_state,
            "provisioning cancelled, deprovisioning host"
        );
        self.next_state = ProvisioningState::Deprovisioning;
        true
    }
}

/// State entered once the action of `state` completes
fn completion_target(state: ProvisioningState) -> Option<ProvisioningState> {
    match state {
        ProvisioningState::Deprovisioning => Some(ProvisioningState::None),
        s => s.successor(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deprovisioning_recycles_to_none() {
        assert_eq!(
            completion_target(ProvisioningState::Deprovisioning),
            Some(ProvisioningState::None)
        );
    }

    #[test]
    fn test_steady_and_terminal_states_stay() {
        for state in [
            ProvisioningState::None,
            ProvisioningState::Provisioned,
            ProvisioningState::Deleting,
        ] {
            assert_eq!(completion_target(state), None, "{state}");
        }
    }
}
