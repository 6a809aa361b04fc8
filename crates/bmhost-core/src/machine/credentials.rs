//! SSH secret rotation gate
//!
//! Runs ahead of every state handler. Secrets rotated outside of the
//! controller send the host back far enough to pick up the new key; a rotated
//! OS secret on a provisioned host is a hard failure.

use tracing::{info, warn};

use crate::error::{CoreError, ErrorType};
use crate::events::{self, HostEvent};
use crate::outcome::ActionOutcome;
use crate::secret::{CredentialKind, SecretChange, SshSecret};
use crate::state::ProvisioningState;

use super::HostStateMachine;

const OS_SECRET_MODIFIED: &str = "secret has been modified although a provisioned machine uses it";

impl HostStateMachine<'_> {
    /// Compare fetched secrets with the stored fingerprints and validate them
    pub(super) async fn update_ssh_keys(&mut self) -> ActionOutcome {
        if self.host.provisioning_state == ProvisioningState::Deprovisioning {
            return ActionOutcome::Complete;
        }

        let (os_secret, rescue_secret) = match self.reconciler.get_ssh_keys(self.host).await {
            Ok(secrets) => secrets,
            Err(e) => return ActionOutcome::Failed(CoreError::SecretFetch(e.to_string())),
        };

        if let Some(secret) = os_secret.as_ref() {
            let outcome = self.sync_os_secret(secret).await;
            if !outcome.is_complete() {
                return outcome;
            }
        }

        if let Some(secret) = rescue_secret.as_ref() {
            let outcome = self.sync_rescue_secret(secret).await;
            if !outcome.is_complete() {
                return outcome;
            }
        }

        ActionOutcome::Complete
    }

    async fn sync_os_secret(&mut self, secret: &SshSecret) -> ActionOutcome {
        let change = self.host.secret_change(secret, CredentialKind::Os);

        if change == SecretChange::Rotated {
            match self.next_state {
                ProvisioningState::Provisioning | ProvisioningState::EnsureProvisioned => {
                    info!(
                        host = %self.host.name,
                        state = %self.next_state,
                        "os ssh secret rotated, installing image again"
                    );
                    self.next_state = ProvisioningState::ImageInstalling;
                }
                ProvisioningState::Provisioned => {
                    return self.fail_os_secret_modified().await;
                }
                _ => {}
            }
        }

        if change != SecretChange::Unchanged
            && let Err(e) = self.host.update_os_ssh_status(secret)
        {
            return ActionOutcome::Failed(e);
        }

        self.reconciler
            .validate_ssh_key(self.host, secret, CredentialKind::Os)
            .await
    }

    async fn sync_rescue_secret(&mut self, secret: &SshSecret) -> ActionOutcome {
        let change = self.host.secret_change(secret, CredentialKind::Rescue);

        if change == SecretChange::Rotated
            && matches!(
                self.next_state,
                ProvisioningState::Preparing
                    | ProvisioningState::Registering
                    | ProvisioningState::ImageInstalling
            )
        {
            warn!(
                host = %self.host.name,
                state = %self.next_state,
                current_rescue = ?self.host.ssh_status.current_rescue,
                "rescue ssh secret rotated, going back to state none"
            );
            self.next_state = ProvisioningState::None;
        }

        if change != SecretChange::Unchanged
            && let Err(e) = self.host.update_rescue_ssh_status(secret)
        {
            return ActionOutcome::Failed(e);
        }

        self.reconciler
            .validate_ssh_key(self.host, secret, CredentialKind::Rescue)
            .await
    }

    async fn fail_os_secret_modified(&mut self) -> ActionOutcome {
        warn!(host = %self.host.name, "{OS_SECRET_MODIFIED}");
        events::emit(
            self.events,
            HostEvent::SshSecretUnexpectedlyModified {
                host: self.host.name.clone(),
                message: OS_SECRET_MODIFIED.to_string(),
            },
        );

        match self
            .reconciler
            .record_action_failure(self.host, ErrorType::RegistrationError, OS_SECRET_MODIFIED)
            .await
        {
            ActionOutcome::Failed(e) => ActionOutcome::Failed(e),
            _ => ActionOutcome::Failed(CoreError::Recorded {
                error_type: ErrorType::RegistrationError,
                message: OS_SECRET_MODIFIED.to_string(),
            }),
        }
    }
}
