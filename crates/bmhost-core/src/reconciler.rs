//! Reconciler trait: the provisioning actions the state machine delegates to

use async_trait::async_trait;

use crate::error::{CoreError, ErrorType};
use crate::host::HostRecord;
use crate::outcome::ActionOutcome;
use crate::secret::{CredentialKind, SshSecret};

/// Service performing the actual provisioning work for a host
///
/// Every method is awaited to completion before the state machine moves on.
/// Actions report `Continue` when they are waiting on something external.
#[async_trait]
pub trait HostReconciler: Send + Sync {
    /// Fetch the current OS and rescue SSH secrets
    ///
    /// # Errors
    /// Returns error if the secrets cannot be read
    async fn get_ssh_keys(
        &self,
        host: &HostRecord,
    ) -> Result<(Option<SshSecret>, Option<SshSecret>), CoreError>;

    /// Check that a secret is usable for the given purpose
    async fn validate_ssh_key(
        &self,
        host: &HostRecord,
        secret: &SshSecret,
        kind: CredentialKind,
    ) -> ActionOutcome;

    /// Record a failure on the host; always yields a failed outcome
    async fn record_action_failure(
        &self,
        host: &HostRecord,
        error_type: ErrorType,
        message: &str,
    ) -> ActionOutcome;

    /// Boot the rescue system
    async fn action_preparing(&self, host: &HostRecord) -> ActionOutcome;

    /// Collect hardware details from the rescue system
    async fn action_registering(&self, host: &HostRecord) -> ActionOutcome;

    /// Install the requested image
    async fn action_image_installing(&self, host: &HostRecord) -> ActionOutcome;

    /// Boot into the installed system
    async fn action_provisioning(&self, host: &HostRecord) -> ActionOutcome;

    /// Wait until the installed system is reachable
    async fn action_ensure_provisioned(&self, host: &HostRecord) -> ActionOutcome;

    /// Keep a provisioned host healthy
    async fn action_provisioned(&self, host: &HostRecord) -> ActionOutcome;

    /// Wipe the host so it can be reused
    async fn action_deprovisioning(&self, host: &HostRecord) -> ActionOutcome;

    /// Release the host before its record is removed
    async fn action_deleting(&self, host: &HostRecord) -> ActionOutcome;
}
