//! `HostStateMachine`: one reconciliation tick for one host
//!
//! Each tick runs, in order, the deletion escalation, the SSH secret gate and
//! the handler of the state the host was in when the tick started. The state
//! computed along the way is written back to the record once, at the end, and
//! only if it differs from the state read at the start.

mod credentials;
mod deletion;
mod handlers;

use tracing::{debug, info};

use crate::events::{self, EventSender, HostEvent};
use crate::host::HostRecord;
use crate::outcome::ActionOutcome;
use crate::reconciler::HostReconciler;
use crate::state::ProvisioningState;

pub use deletion::deletion_target;

/// Finite state machine driving a `HostRecord` through its lifecycle
pub struct HostStateMachine<'a> {
    /// Record being reconciled; exclusively borrowed for the tick
    host: &'a mut HostRecord,
    /// Service performing the provisioning actions
    reconciler: &'a dyn HostReconciler,
    /// Lifecycle event channel
    events: &'a EventSender,
    /// State the host moves to when the tick ends
    next_state: ProvisioningState,
}

impl<'a> HostStateMachine<'a> {
    /// Create a state machine that remains in the current state by default
    pub fn new(
        host: &'a mut HostRecord,
        reconciler: &'a dyn HostReconciler,
        events: &'a EventSender,
    ) -> Self {
        let next_state = host.provisioning_state;
        Self {
            host,
            reconciler,
            events,
            next_state,
        }
    }

    /// State the tick has computed so far
    #[must_use]
    pub fn next_state(&self) -> ProvisioningState {
        self.next_state
    }

    /// Run one tick and commit the resulting state
    pub async fn reconcile_state(&mut self) -> ActionOutcome {
        let initial_state = self.host.provisioning_state;
        let outcome = self.run(initial_state).await;
        self.commit(initial_state);
        outcome
    }

    async fn run(&mut self, initial_state: ProvisioningState) -> ActionOutcome {
        if self.check_initiate_delete() {
            info!(host = %self.host.name, state = %initial_state, "initiating host deletion");
            return ActionOutcome::Complete;
        }

        let gate = self.update_ssh_keys().await;
        if !gate.is_complete() {
            return gate;
        }

        // A rotated secret sent the host back; the stale state's action must not run.
        if self.next_state != initial_state {
            debug!(
                host = %self.host.name,
                state = %initial_state,
                next = %self.next_state,
                "skipping handler after ssh secret rotation"
            );
            return ActionOutcome::Complete;
        }

        self.dispatch(initial_state).await
    }

    fn commit(&mut self, initial_state: ProvisioningState) {
        if self.next_state == initial_state {
            return;
        }

        info!(
            host = %self.host.name,
            old = %initial_state,
            new = %self.next_state,
            "changing provisioning state"
        );
        self.host.provisioning_state = self.next_state;

        events::emit(
            self.events,
            HostEvent::ProvisioningStateChanged {
                host: self.host.name.clone(),
                from: initial_state,
                to: self.next_state,
            },
        );
    }
}
