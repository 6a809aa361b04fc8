//! `OrchestratorActor`: Fleet-wide reconciliation
//!
//! Manages registry of `HostActors` and fans reconciliation ticks out to them.

use std::collections::HashMap;
use std::sync::Arc;

use bmhost_core::{ActionOutcome, HostEvent, HostReconciler, HostRecord};
use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::{ActorStopReason, SendError};
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::actor::host::{HostActor, HostActorArgs};
use crate::config::ReconcileConfig;
use crate::error::ControllerError;
use crate::message::{
    GetHostStatus, GetStatus, HostStatus, ListHosts, Reconcile, ReconcileAll, ReconcileHost,
    ReconcileSummary, RegisterHost, RequestDeletion, RequestHostDeletion, SetHostInstallImage,
    SetInstallImage, StartHostProvisioning, StartProvisioning, TickReport, UnregisterHost,
};

/// Factory trait for creating the reconciler of a host
///
/// Allows injection of different provisioning back-ends per host.
#[async_trait::async_trait]
pub trait ReconcilerFactory: Send + Sync {
    /// Create a reconciler for the given host
    ///
    /// # Errors
    /// Returns error if the host's provisioning back-end cannot be reached
    async fn create_reconciler(
        &self,
        record: &HostRecord,
    ) -> Result<Arc<dyn HostReconciler>, ControllerError>;
}

/// Arguments for spawning an `OrchestratorActor`
pub struct OrchestratorActorArgs {
    /// Reconciliation settings
    pub config: ReconcileConfig,
    /// Factory for creating host reconcilers
    pub reconciler_factory: Arc<dyn ReconcilerFactory>,
    /// Event broadcast sender shared with all hosts
    pub event_tx: broadcast::Sender<HostEvent>,
}

impl OrchestratorActorArgs {
    /// Create args with a fresh event channel sized from the config
    pub fn new(config: ReconcileConfig, reconciler_factory: Arc<dyn ReconcilerFactory>) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        Self {
            config,
            reconciler_factory,
            event_tx,
        }
    }

    /// Get event receiver for lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.event_tx.subscribe()
    }
}

/// Fleet orchestrator managing all host actors
pub struct OrchestratorActor {
    /// Registry of host actors by hostname
    hosts: HashMap<String, ActorRef<HostActor>>,
    /// Reconciliation settings
    config: ReconcileConfig,
    /// Event broadcast sender
    event_tx: broadcast::Sender<HostEvent>,
    /// Factory for creating host reconcilers
    reconciler_factory: Arc<dyn ReconcilerFactory>,
}

/// Unwrap the handler error of an ask, keeping its type
fn flatten_reply<M, T>(
    result: Result<T, SendError<M, ControllerError>>,
) -> Result<T, ControllerError> {
    match result {
        Ok(value) => Ok(value),
        Err(SendError::HandlerError(e)) => Err(e),
        Err(e) => Err(ControllerError::ActorError(e.to_string())),
    }
}

impl OrchestratorActor {
    /// Get number of managed hosts
    #[must_use]
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    fn host(&self, hostname: &str) -> Result<&ActorRef<HostActor>, ControllerError> {
        self.hosts
            .get(hostname)
            .ok_or_else(|| ControllerError::HostNotFound(hostname.to_string()))
    }

    /// Spawn a `HostActor` for the given record
    async fn spawn_host_actor(
        &mut self,
        record: HostRecord,
    ) -> Result<ActorRef<HostActor>, ControllerError> {
        let reconciler = self.reconciler_factory.create_reconciler(&record).await?;
        let name = record.name.clone();

        let args = HostActorArgs {
            record,
            reconciler,
            event_tx: self.event_tx.clone(),
            error_requeue: self.config.error_requeue(),
        };

        let actor_ref = HostActor::spawn(args);

        info!(host = %name, "spawned HostActor");

        Ok(actor_ref)
    }

    /// Drop a host whose deletion has finished
    async fn remove_deleted(&mut self, hostname: &str) {
        if let Some(actor_ref) = self.hosts.remove(hostname) {
            actor_ref.stop_gracefully().await.ok();
            info!(host = %hostname, "host deleted, removed from registry");
        }
    }
}

impl Actor for OrchestratorActor {
    type Args = OrchestratorActorArgs;
    type Error = ControllerError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(id = %actor_ref.id(), "OrchestratorActor starting");

        Ok(Self {
            hosts: HashMap::new(),
            config: args.config,
            event_tx: args.event_tx,
            reconciler_factory: args.reconciler_factory,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(reason = ?reason, "OrchestratorActor stopping");

        // Stop all host actors
        for (name, actor_ref) in &self.hosts {
            info!(host = %name, "stopping HostActor");
            actor_ref.stop_gracefully().await.ok();
        }

        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<RegisterHost> for OrchestratorActor {
    type Reply = Result<(), ControllerError>;

    async fn handle(
        &mut self,
        msg: RegisterHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let name = msg.record.name.clone();

        if self.hosts.contains_key(&name) {
            return Err(ControllerError::HostAlreadyExists(name));
        }

        let actor_ref = self.spawn_host_actor(msg.record).await?;
        self.hosts.insert(name, actor_ref);

        Ok(())
    }
}

impl Message<UnregisterHost> for OrchestratorActor {
    type Reply = Result<(), ControllerError>;

    async fn handle(
        &mut self,
        msg: UnregisterHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let name = &msg.hostname;

        if let Some(actor_ref) = self.hosts.remove(name) {
            actor_ref.stop_gracefully().await.ok();
            info!(host = %name, "unregistered host");
            Ok(())
        } else {
            Err(ControllerError::HostNotFound(name.clone()))
        }
    }
}

impl Message<ReconcileHost> for OrchestratorActor {
    type Reply = Result<TickReport, ControllerError>;

    async fn handle(
        &mut self,
        msg: ReconcileHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let report = self
            .host(&msg.hostname)?
            .ask(Reconcile)
            .await
            .map_err(|e| ControllerError::ActorError(e.to_string()))?;

        if report.deleted() {
            self.remove_deleted(&msg.hostname).await;
        }

        Ok(report)
    }
}

impl Message<ReconcileAll> for OrchestratorActor {
    type Reply = Result<ReconcileSummary, ControllerError>;

    async fn handle(
        &mut self,
        _msg: ReconcileAll,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let mut hosts: Vec<_> = self
            .hosts
            .iter()
            .map(|(name, actor)| (name.clone(), actor.clone()))
            .collect();
        hosts.sort_by(|a, b| a.0.cmp(&b.0));

        let mut summary = ReconcileSummary {
            total: hosts.len(),
            ..ReconcileSummary::default()
        };

        info!(
            total_hosts = summary.total,
            batch_size = self.config.max_concurrent_reconciles,
            "reconciling all hosts"
        );

        // Process in batches
        for batch in hosts.chunks(self.config.max_concurrent_reconciles.max(1)) {
            let mut handles = Vec::new();

            for (name, actor_ref) in batch {
                let actor = actor_ref.clone();
                let handle = tokio::spawn(async move { actor.ask(Reconcile).await });
                handles.push((name.clone(), handle));
            }

            // Wait for batch to complete
            for (name, handle) in handles {
                match handle.await {
                    Ok(Ok(report)) => {
                        if report.changed() {
                            summary.advanced += 1;
                        }
                        if report.deleted() {
                            summary.deleted.push(name.clone());
                        }
                        match report.outcome {
                            ActionOutcome::Complete => {}
                            ActionOutcome::Continue { .. } => summary.waiting += 1,
                            ActionOutcome::Failed(e) => {
                                summary.failed += 1;
                                summary.errors.push((name, e.into()));
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        summary.failed += 1;
                        error!(host = %name, error = %e, "reconcile request failed");
                        summary
                            .errors
                            .push((name, ControllerError::ActorError(e.to_string())));
                    }
                    Err(e) => {
                        summary.failed += 1;
                        error!(host = %name, error = %e, "task panicked");
                        summary
                            .errors
                            .push((name, ControllerError::ActorError(e.to_string())));
                    }
                }
            }
        }

        for name in summary.deleted.clone() {
            self.remove_deleted(&name).await;
        }

        info!(
            total = summary.total,
            advanced = summary.advanced,
            waiting = summary.waiting,
            failed = summary.failed,
            deleted = summary.deleted.len(),
            "reconcile pass finished"
        );

        Ok(summary)
    }
}

impl Message<GetHostStatus> for OrchestratorActor {
    type Reply = Result<HostStatus, ControllerError>;

    async fn handle(
        &mut self,
        msg: GetHostStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.host(&msg.hostname)?
            .ask(GetStatus)
            .await
            .map_err(|e| ControllerError::ActorError(e.to_string()))
    }
}

impl Message<ListHosts> for OrchestratorActor {
    type Reply = Vec<HostStatus>;

    async fn handle(
        &mut self,
        _msg: ListHosts,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let mut statuses = Vec::with_capacity(self.hosts.len());

        for (name, actor_ref) in &self.hosts {
            match actor_ref.ask(GetStatus).await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    warn!(host = %name, error = %e, "failed to get host status");
                }
            }
        }

        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

impl Message<StartHostProvisioning> for OrchestratorActor {
    type Reply = Result<(), ControllerError>;

    async fn handle(
        &mut self,
        msg: StartHostProvisioning,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        flatten_reply(self.host(&msg.hostname)?.ask(StartProvisioning).await)
    }
}

impl Message<RequestHostDeletion> for OrchestratorActor {
    type Reply = Result<(), ControllerError>;

    async fn handle(
        &mut self,
        msg: RequestHostDeletion,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        flatten_reply(self.host(&msg.hostname)?.ask(RequestDeletion).await)
    }
}

impl Message<SetHostInstallImage> for OrchestratorActor {
    type Reply = Result<(), ControllerError>;

    async fn handle(
        &mut self,
        msg: SetHostInstallImage,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let install_image = msg.install_image;
        flatten_reply(
            self.host(&msg.hostname)?
                .ask(SetInstallImage { install_image })
                .await,
        )
    }
}
