//! bmhost-controller: Reconciliation driver for bare-metal hosts
//!
//! Implements the `OrchestratorActor` and `HostActor` using kameo framework.
//! Each `HostActor` owns one `HostRecord` and runs the provisioning state
//! machine from `bmhost-core` on every `Reconcile` tick.

pub mod actor;
pub mod config;
pub mod error;
pub mod message;
pub mod telemetry;

pub use actor::host::{HostActor, HostActorArgs, requeue_after};
pub use actor::orchestrator::{OrchestratorActor, OrchestratorActorArgs, ReconcilerFactory};
pub use config::{ControllerConfig, LogFormat, LoggingConfig, ReconcileConfig};
pub use error::ControllerError;
pub use message::{
    GetHostStatus, GetRecord, GetStatus, HostStatus, ListHosts, Reconcile, ReconcileAll,
    ReconcileHost, ReconcileSummary, RegisterHost, RequestDeletion, RequestHostDeletion,
    SetHostInstallImage, SetInstallImage, StartHostProvisioning, StartProvisioning, TickReport,
    UnregisterHost,
};
