//! `HostActor`: Per-host reconciliation
//!
//! Owns the record of a single host and runs the provisioning state machine
//! on it. The actor mailbox serializes ticks for the host.

use std::sync::Arc;
use std::time::Duration;

use bmhost_core::events;
use bmhost_core::{
    ActionOutcome, HostEvent, HostReconciler, HostRecord, HostStateMachine, ProvisioningState,
};
use chrono::{DateTime, Utc};
use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::ControllerError;
use crate::message::{
    GetRecord, GetStatus, HostStatus, Reconcile, RequestDeletion, SetInstallImage,
    StartProvisioning, TickReport,
};

/// Arguments for spawning a `HostActor`
pub struct HostActorArgs {
    /// Record to reconcile
    pub record: HostRecord,
    /// Service performing the provisioning actions
    pub reconciler: Arc<dyn HostReconciler>,
    /// Event broadcast sender
    pub event_tx: broadcast::Sender<HostEvent>,
    /// Requeue delay after a failed tick
    pub error_requeue: Duration,
}

/// Per-host actor running the provisioning state machine
pub struct HostActor {
    /// Host record
    record: HostRecord,
    /// Service performing the provisioning actions
    reconciler: Arc<dyn HostReconciler>,
    /// Event broadcast sender
    event_tx: broadcast::Sender<HostEvent>,
    /// Requeue delay after a failed tick
    error_requeue: Duration,
    /// Outcome of the last tick
    last_outcome: Option<ActionOutcome>,
    /// Failed ticks in a row
    consecutive_failures: u32,
    /// When the last tick ran
    last_reconciled: Option<DateTime<Utc>>,
}

/// When a host should be reconciled again after a tick
///
/// `None` means the host waits for an external change: it was recycled to
/// `None`, its deletion finished, or the failure will not heal by retrying.
#[must_use]
pub fn requeue_after(
    from: ProvisioningState,
    record: &HostRecord,
    outcome: &ActionOutcome,
    error_requeue: Duration,
) -> Option<Duration> {
    match outcome {
        ActionOutcome::Complete => {
            let idle = record.provisioning_state == ProvisioningState::None
                && !record.deletion_requested();
            if from == ProvisioningState::Deleting || idle {
                None
            } else {
                Some(Duration::ZERO)
            }
        }
        ActionOutcome::Continue { delay } => Some(*delay),
        ActionOutcome::Failed(e) if e.is_fatal() => None,
        ActionOutcome::Failed(_) => Some(error_requeue),
    }
}

impl HostActor {
    /// Get the hostname
    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Get current provisioning state
    #[must_use]
    pub fn state(&self) -> ProvisioningState {
        self.record.provisioning_state
    }

    async fn reconcile(&mut self) -> TickReport {
        let from = self.record.provisioning_state;

        let outcome = if from == ProvisioningState::Deleting && self.record.deletion_requested() {
            self.finish_deletion().await
        } else {
            HostStateMachine::new(&mut self.record, self.reconciler.as_ref(), &self.event_tx)
                .reconcile_state()
                .await
        };

        match &outcome {
            ActionOutcome::Failed(e) => {
                self.consecutive_failures += 1;
                error!(
                    host = %self.record.name,
                    state = %from,
                    failures = self.consecutive_failures,
                    error = %e,
                    "reconcile failed"
                );
            }
            _ => self.consecutive_failures = 0,
        }

        let requeue_after = requeue_after(from, &self.record, &outcome, self.error_requeue);
        self.last_reconciled = Some(Utc::now());
        self.last_outcome = Some(outcome.clone());

        TickReport {
            host: self.record.name.clone(),
            from,
            to: self.record.provisioning_state,
            outcome,
            requeue_after,
        }
    }

    /// Run the deleting action of a host marked for deletion
    ///
    /// The state machine only diverts such a host onto `Deleting`, so the
    /// record's owner drives the final action. Secrets are not fetched.
    async fn finish_deletion(&mut self) -> ActionOutcome {
        info!(host = %self.record.name, "finishing host deletion");
        self.reconciler.action_deleting(&self.record).await
    }

    /// Leave `None` for `Preparing`; the state machine never does this itself
    fn start_provisioning(&mut self) -> Result<(), ControllerError> {
        let from = self.record.provisioning_state;
        if from != ProvisioningState::None {
            return Err(ControllerError::InvalidTransition {
                host: self.record.name.clone(),
                from,
                to: ProvisioningState::Preparing,
            });
        }
        if self.record.deletion_requested() {
            return Err(ControllerError::DeletionRequested(self.record.name.clone()));
        }
        if self.record.install_image.is_none() {
            return Err(ControllerError::MissingInstallImage(
                self.record.name.clone(),
            ));
        }

        self.record.provisioning_state = ProvisioningState::Preparing;
        info!(
            host = %self.record.name,
            old = %from,
            new = %ProvisioningState::Preparing,
            "changing provisioning state"
        );

        events::emit(
            &self.event_tx,
            HostEvent::ProvisioningStateChanged {
                host: self.record.name.clone(),
                from,
                to: ProvisioningState::Preparing,
            },
        );
        Ok(())
    }
}

impl Actor for HostActor {
    type Args = HostActorArgs;
    type Error = ControllerError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(
            host = %args.record.name,
            state = %args.record.provisioning_state,
            id = %actor_ref.id(),
            "HostActor starting"
        );

        Ok(Self {
            record: args.record,
            reconciler: args.reconciler,
            event_tx: args.event_tx,
            error_requeue: args.error_requeue,
            last_outcome: None,
            consecutive_failures: 0,
            last_reconciled: None,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(
            host = %self.record.name,
            reason = ?reason,
            "HostActor stopping"
        );
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<Reconcile> for HostActor {
    type Reply = TickReport;

    async fn handle(
        &mut self,
        _msg: Reconcile,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.reconcile().await
    }
}

impl Message<StartProvisioning> for HostActor {
    type Reply = Result<(), ControllerError>;

    async fn handle(
        &mut self,
        _msg: StartProvisioning,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.start_provisioning()
    }
}

impl Message<RequestDeletion> for HostActor {
    type Reply = Result<(), ControllerError>;

    async fn handle(
        &mut self,
        _msg: RequestDeletion,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.record.deletion_requested() {
            return Ok(());
        }

        self.record.request_deletion(Utc::now());
        info!(
            host = %self.record.name,
            state = %self.record.provisioning_state,
            "deletion requested"
        );
        Ok(())
    }
}

impl Message<SetInstallImage> for HostActor {
    type Reply = Result<(), ControllerError>;

    async fn handle(
        &mut self,
        msg: SetInstallImage,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match &msg.install_image {
            Some(image) => info!(host = %self.record.name, image = %image.image, "install image set"),
            None if self.record.provisioning_state != ProvisioningState::None => warn!(
                host = %self.record.name,
                state = %self.record.provisioning_state,
                "install image removed, provisioning will be cancelled"
            ),
            None => {}
        }

        self.record.install_image = msg.install_image;
        Ok(())
    }
}

impl Message<GetStatus> for HostActor {
    type Reply = HostStatus;

    async fn handle(
        &mut self,
        _msg: GetStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        HostStatus {
            name: self.record.name.clone(),
            state: self.record.provisioning_state,
            deletion_requested: self.record.deletion_requested(),
            install_image: self.record.install_image.as_ref().map(|i| i.image.clone()),
            last_outcome: self.last_outcome.as_ref().map(|o| o.label().to_string()),
            last_error: self
                .last_outcome
                .as_ref()
                .and_then(ActionOutcome::error)
                .map(ToString::to_string),
            consecutive_failures: self.consecutive_failures,
            last_reconciled: self.last_reconciled,
        }
    }
}

impl Message<GetRecord> for HostActor {
    type Reply = Result<HostRecord, ControllerError>;

    async fn handle(
        &mut self,
        _msg: GetRecord,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.record.clone())
    }
}
