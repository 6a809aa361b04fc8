//! Host lifecycle events

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::state::ProvisioningState;

/// Sender half handed to the state machine
pub type EventSender = broadcast::Sender<HostEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostEvent {
    ProvisioningStateChanged {
        host: String,
        from: ProvisioningState,
        to: ProvisioningState,
    },
    DeletionInitiated {
        host: String,
        from: ProvisioningState,
        to: ProvisioningState,
    },
    SshSecretUnexpectedlyModified {
        host: String,
        message: String,
    },
}

/// Broadcast an event; having no subscribers is fine
pub fn emit(events: &EventSender, event: HostEvent) {
    let _ = events.send(event);
}
