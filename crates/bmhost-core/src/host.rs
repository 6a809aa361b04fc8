//! Host record: the persisted snapshot a tick operates on

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::secret::{CredentialKind, SecretChange, SecretStatus, SshSecret};
use crate::state::ProvisioningState;

/// Requested operating system installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallImage {
    /// Image name or URL understood by the installer
    pub image: String,
    /// Script run after the image has been installed
    #[serde(default)]
    pub post_install_script: Option<String>,
}

impl InstallImage {
    /// Create an install request for the given image
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            post_install_script: None,
        }
    }

    /// Set post-install script
    #[must_use]
    pub fn with_post_install_script(mut self, script: impl Into<String>) -> Self {
        self.post_install_script = Some(script.into());
        self
    }
}

/// Fingerprints of the SSH secrets the host was last seen with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshStatus {
    #[serde(default)]
    pub current_os: Option<SecretStatus>,
    #[serde(default)]
    pub current_rescue: Option<SecretStatus>,
}

/// Mutable snapshot of a bare-metal host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    /// Unique host name
    pub name: String,
    /// Where in the lifecycle the host is
    #[serde(default)]
    pub provisioning_state: ProvisioningState,
    /// Set once when deletion is requested
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Absent while mid-lifecycle means provisioning was cancelled
    #[serde(default)]
    pub install_image: Option<InstallImage>,
    #[serde(default)]
    pub ssh_status: SshStatus,
}

impl HostRecord {
    /// Create a record in state `None`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provisioning_state: ProvisioningState::None,
            deletion_timestamp: None,
            install_image: None,
            ssh_status: SshStatus::default(),
        }
    }

    /// Set the provisioning state
    #[must_use]
    pub fn with_state(mut self, state: ProvisioningState) -> Self {
        self.provisioning_state = state;
        self
    }

    /// Set the install image
    #[must_use]
    pub fn with_install_image(mut self, image: InstallImage) -> Self {
        self.install_image = Some(image);
        self
    }

    #[must_use]
    pub fn deletion_requested(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Mark the host for deletion; an existing marker is kept
    pub fn request_deletion(&mut self, at: DateTime<Utc>) {
        if self.deletion_timestamp.is_none() {
            self.deletion_timestamp = Some(at);
        }
    }

    #[must_use]
    pub fn provisioning_cancelled(&self) -> bool {
        self.install_image.is_none()
    }

    /// Compare a fetched secret against the stored fingerprint
    #[must_use]
    pub fn secret_change(&self, secret: &SshSecret, kind: CredentialKind) -> SecretChange {
        let stored = match kind {
            CredentialKind::Os => self.ssh_status.current_os.as_ref(),
            CredentialKind::Rescue => self.ssh_status.current_rescue.as_ref(),
        };
        SecretChange::detect(stored, secret)
    }

    /// Store the fingerprint of the OS secret
    ///
    /// # Errors
    /// Returns `CoreError::SecretStatusUpdate` if the secret cannot be fingerprinted
    pub fn update_os_ssh_status(&mut self, secret: &SshSecret) -> Result<(), CoreError> {
        self.ssh_status.current_os = Some(fingerprint(secret, CredentialKind::Os)?);
        Ok(())
    }

    /// Store the fingerprint of the rescue secret
    ///
    /// # Errors
    /// Returns `CoreError::SecretStatusUpdate` if the secret cannot be fingerprinted
    pub fn update_rescue_ssh_status(&mut self, secret: &SshSecret) -> Result<(), CoreError> {
        self.ssh_status.current_rescue = Some(fingerprint(secret, CredentialKind::Rescue)?);
        Ok(())
    }
}

fn fingerprint(secret: &SshSecret, kind: CredentialKind) -> Result<SecretStatus, CoreError> {
    SecretStatus::from_secret(secret, kind).map_err(|e| CoreError::SecretStatusUpdate {
        kind,
        reason: e.to_string(),
    })
}
