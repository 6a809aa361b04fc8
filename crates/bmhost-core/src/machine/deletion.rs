//! Deletion escalation

use crate::events::{self, HostEvent};
use crate::state::ProvisioningState;

use super::HostStateMachine;

/// State a host marked for deletion has to divert to, if any
///
/// Only `Deprovisioning` keeps running its handler. A host already in
/// `Deleting` is diverted onto itself, which ends the tick; the deleting
/// action of a marked host is run by whoever removes the record.
#[must_use]
pub fn deletion_target(state: ProvisioningState) -> Option<ProvisioningState> {
    match state {
        ProvisioningState::Deprovisioning => None,
        s if s.requires_deprovisioning() => Some(ProvisioningState::Deprovisioning),
        _ => Some(ProvisioningState::Deleting),
    }
}

impl HostStateMachine<'_> {
    /// Divert to the deletion branch; returns true if the tick ends here
    pub(super) fn check_initiate_delete(&mut self) -> bool {
        if !self.host.deletion_requested() {
            return false;
        }

        let Some(target) = deletion_target(self.next_state) else {
            return false;
        };

        if target != self.next_state {
            events::emit(
                self.events,
                HostEvent::DeletionInitiated {
                    host: self.host.name.clone(),
                    from: self.next_state,
                    to: target,
                },
            );
            self.next_state = target;
        }
        true
    }
}
