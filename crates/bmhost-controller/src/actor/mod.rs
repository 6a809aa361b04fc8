//! Actor implementations

pub mod host;
pub mod orchestrator;

pub use host::{HostActor, HostActorArgs};
pub use orchestrator::{OrchestratorActor, OrchestratorActorArgs, ReconcilerFactory};
