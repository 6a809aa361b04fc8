//! bmhost-core: Provisioning state machine for bare-metal hosts
//!
//! Sequences the lifecycle of a single `HostRecord` on every reconciliation
//! tick: deletion escalation, SSH secret rotation checks, and the per-state
//! handlers that delegate to a `HostReconciler`.

pub mod error;
pub mod events;
pub mod host;
pub mod machine;
pub mod outcome;
pub mod reconciler;
pub mod secret;
pub mod state;

pub use error::{CoreError, ErrorType};
pub use events::{EventSender, HostEvent};
pub use host::{HostRecord, InstallImage, SshStatus};
pub use machine::HostStateMachine;
pub use outcome::ActionOutcome;
pub use reconciler::HostReconciler;
pub use secret::{CredentialKind, SecretChange, SecretReference, SecretStatus, SshSecret};
pub use state::ProvisioningState;
